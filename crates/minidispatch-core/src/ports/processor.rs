//! JobProcessor port - the work a worker does for a claimed job.
//!
//! The core does not know what a job means; it only needs a result code
//! to write when the job moves to Done.

use async_trait::async_trait;

use crate::domain::{DEFAULT_RESULT_CODE, ExperimentId, JobId};

/// A job the calling worker has claimed and committed as Claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimedJob {
    pub id: JobId,
    pub experiment: ExperimentId,
}

#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Run the job and return the result code to store.
    ///
    /// An `Err` is fatal for the worker; the row stays Claimed.
    async fn process(&self, job: &ClaimedJob) -> Result<i32, String>;
}

/// Finishes every job immediately with a fixed result code.
#[derive(Debug, Clone, Copy)]
pub struct FixedResultProcessor {
    result_code: i32,
}

impl FixedResultProcessor {
    pub fn new(result_code: i32) -> Self {
        Self { result_code }
    }
}

impl Default for FixedResultProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_RESULT_CODE)
    }
}

#[async_trait]
impl JobProcessor for FixedResultProcessor {
    async fn process(&self, _job: &ClaimedJob) -> Result<i32, String> {
        Ok(self.result_code)
    }
}
