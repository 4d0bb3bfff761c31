//! Job row and derived per-experiment counters.

use serde::{Deserialize, Serialize};

use super::{ExperimentId, JobId, JobStatus};

/// Result code written when the default processor finishes a job.
pub const DEFAULT_RESULT_CODE: i32 = 11;

/// One row of the job table.
///
/// Workers only ever see a transient copy of this while they hold the row
/// lock; the store owns the persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub experiment_id: ExperimentId,
    pub status: JobStatus,
    pub result_code: i32,
}

impl JobRecord {
    /// A freshly created, not yet dispatched job.
    pub fn pending(id: JobId, experiment_id: ExperimentId) -> Self {
        Self {
            id,
            experiment_id,
            status: JobStatus::Pending,
            result_code: 0,
        }
    }
}

/// Number of jobs per status for one experiment.
///
/// Derived on demand from the store, never cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentCounters {
    pub pending: u64,
    pub claimed: u64,
    pub done: u64,
}

impl ExperimentCounters {
    pub fn total(&self) -> u64 {
        self.pending + self.claimed + self.done
    }

    /// No job is waiting or in flight.
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.claimed == 0
    }

    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Claimed => self.claimed,
            JobStatus::Done => self.done,
        }
    }

    pub fn set(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending = count,
            JobStatus::Claimed => self.claimed = count,
            JobStatus::Done => self.done = count,
        }
    }
}
