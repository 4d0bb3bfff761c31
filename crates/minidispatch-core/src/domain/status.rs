//! Job status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a job row.
///
/// State transitions:
/// - Pending -> Claimed -> Done
///
/// Nothing ever moves backwards. The discriminants are the values stored in
/// the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Not yet picked up by any worker.
    Pending,

    /// Claimed by a worker and being processed.
    Claimed,

    /// Finished; `result_code` holds the outcome.
    Done,
}

impl JobStatus {
    pub const ALL: [JobStatus; 3] = [JobStatus::Pending, JobStatus::Claimed, JobStatus::Done];

    /// Value of the `status` column.
    pub const fn code(self) -> i32 {
        match self {
            JobStatus::Pending => -1,
            JobStatus::Claimed => 0,
            JobStatus::Done => 1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(JobStatus::Pending),
            0 => Some(JobStatus::Claimed),
            1 => Some(JobStatus::Done),
            _ => None,
        }
    }

    /// The only status a row may be in before moving to `self`.
    pub const fn predecessor(self) -> Option<JobStatus> {
        match self {
            JobStatus::Pending => None,
            JobStatus::Claimed => Some(JobStatus::Pending),
            JobStatus::Done => Some(JobStatus::Claimed),
        }
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        next.predecessor() == Some(self)
    }

    /// Is the row eligible for selection?
    pub fn is_candidate(self) -> bool {
        matches!(self, JobStatus::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Claimed => "claimed",
            JobStatus::Done => "done",
        };
        f.write_str(name)
    }
}
