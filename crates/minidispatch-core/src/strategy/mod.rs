//! Selection strategies - how a worker picks which candidate row to lock.
//!
//! All strategies run inside the caller's transaction and leave the chosen
//! row locked on `Some`. `None` means the strategy found nothing to lock.
//!
//! | selector | strategy            | round trips |
//! |----------|---------------------|-------------|
//! | 0        | `FloorRandomLock`   | 2           |
//! | 1        | `OrderByRandomLock` | 1           |
//! | 2        | `FirstFreeLock`     | 1           |

mod first_free;
mod floor_random;
mod order_by_random;

pub use first_free::FirstFreeLock;
pub use floor_random::FloorRandomLock;
pub use order_by_random::OrderByRandomLock;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ExperimentId, JobId};
use crate::error::{ConfigError, StoreError};
use crate::ports::JobSession;

/// Picks and locks one candidate row.
#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn select(
        &self,
        session: &mut dyn JobSession,
        experiment: ExperimentId,
    ) -> Result<Option<JobId>, StoreError>;
}

/// Strategy selector, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    FloorRandom,
    OrderByRandom,
    FirstFree,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::FloorRandom,
        StrategyKind::OrderByRandom,
        StrategyKind::FirstFree,
    ];

    /// Numeric selector used on the command line.
    pub const fn selector(self) -> u8 {
        match self {
            StrategyKind::FloorRandom => 0,
            StrategyKind::OrderByRandom => 1,
            StrategyKind::FirstFree => 2,
        }
    }

    pub fn from_selector(selector: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.selector() == selector)
    }

    pub const fn name(self) -> &'static str {
        match self {
            StrategyKind::FloorRandom => "floor-random",
            StrategyKind::OrderByRandom => "order-by-random",
            StrategyKind::FirstFree => "first-free",
        }
    }

    /// Build the strategy. `seed` only affects client-side randomness.
    pub fn build(self, seed: Option<u64>) -> Arc<dyn SelectionStrategy> {
        match self {
            StrategyKind::FloorRandom => Arc::new(match seed {
                Some(seed) => FloorRandomLock::with_seed(seed),
                None => FloorRandomLock::new(),
            }),
            StrategyKind::OrderByRandom => Arc::new(OrderByRandomLock),
            StrategyKind::FirstFree => Arc::new(FirstFreeLock),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    /// Accepts the numeric selector or the strategy name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(selector) = s.parse::<u8>() {
            return Self::from_selector(selector)
                .ok_or_else(|| ConfigError::UnknownStrategy(s.to_string()));
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownStrategy(s.to_string()))
    }
}
