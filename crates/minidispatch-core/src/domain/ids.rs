//! Domain identifiers (strongly-typed IDs).
//!
//! Rows in the job table are keyed by plain integers. `Id<T>` keeps the
//! integer representation but uses a phantom marker so a `JobId` can never
//! be passed where an `ExperimentId` is expected.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// Marker trait for each ID kind.
///
/// Provides the prefix used by `Display` ("job-", "experiment-").
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic integer ID.
///
/// `T` costs nothing at runtime; it only exists for the type checker.
/// Serializes as the bare integer.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    value: i64,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub const fn new(value: i64) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    /// Raw value as stored in the job table.
    pub const fn get(self) -> i64 {
        self.value
    }
}

impl<T: IdMarker> From<i64> for Id<T> {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(Self::new)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

/// Marker for job rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job-"
    }
}

/// Marker for experiments (the unit a dispatch run works on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Experiment {}

impl IdMarker for Experiment {
    fn prefix() -> &'static str {
        "experiment-"
    }
}

/// Identifier of a job row (`idJob`).
pub type JobId = Id<Job>;

/// Identifier of an experiment (`Experiment_idExperiment`).
pub type ExperimentId = Id<Experiment>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_prefix() {
        assert_eq!(JobId::new(42).to_string(), "job-42");
        assert_eq!(ExperimentId::new(7).to_string(), "experiment-7");
    }

    #[test]
    fn ids_order_by_value() {
        let mut ids = vec![JobId::new(3), JobId::new(1), JobId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![JobId::new(1), JobId::new(2), JobId::new(3)]);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;

        assert_eq!(size_of::<JobId>(), size_of::<i64>());
        assert_eq!(size_of::<ExperimentId>(), size_of::<i64>());
    }
}
