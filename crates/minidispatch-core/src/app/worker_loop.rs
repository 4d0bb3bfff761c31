//! Worker - claim → process → commit loop.
//!
//! # Flow
//! 1. Idle → Claiming: the strategy locks a candidate row.
//! 2. The row moves Pending → Claimed in the same transaction; commit.
//! 3. Processing: the processor runs, the row moves Claimed → Done with the
//!    result code; commit; back to Idle.
//! 4. No candidate left → Done, the worker returns.
//!
//! A store error while claiming or finishing is fatal for this worker only.

use std::sync::Arc;

use serde::Serialize;

use crate::domain::{ExperimentId, JobId, JobStatus};
use crate::error::{DispatchError, StoreError};
use crate::ports::{ClaimedJob, JobProcessor, JobSession};
use crate::strategy::SelectionStrategy;

/// Worker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Claiming,
    Processing(JobId),
    Done,
}

/// What one worker did before reaching `Done`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub worker: usize,
    /// Jobs this worker moved to Done, in order.
    pub processed: Vec<JobId>,
    /// Selections that came back empty while candidates still existed.
    pub raced: u32,
}

pub struct Worker {
    id: usize,
    experiment: ExperimentId,
    strategy: Arc<dyn SelectionStrategy>,
    processor: Arc<dyn JobProcessor>,
}

impl Worker {
    pub fn new(
        id: usize,
        experiment: ExperimentId,
        strategy: Arc<dyn SelectionStrategy>,
        processor: Arc<dyn JobProcessor>,
    ) -> Self {
        Self {
            id,
            experiment,
            strategy,
            processor,
        }
    }

    /// Run until no candidate is left.
    pub async fn run(self, mut session: Box<dyn JobSession>) -> Result<WorkerReport, DispatchError> {
        let mut report = WorkerReport {
            worker: self.id,
            ..WorkerReport::default()
        };
        let mut state = WorkerState::Idle;

        loop {
            state = match state {
                WorkerState::Idle => WorkerState::Claiming,
                WorkerState::Claiming => match self.claim(session.as_mut()).await? {
                    Some(job) => WorkerState::Processing(job),
                    None if self.candidates_remain(session.as_mut()).await? => {
                        report.raced += 1;
                        WorkerState::Idle
                    }
                    None => WorkerState::Done,
                },
                WorkerState::Processing(job) => {
                    self.process(session.as_mut(), job).await?;
                    report.processed.push(job);
                    WorkerState::Idle
                }
                WorkerState::Done => break,
            };
            tracing::trace!(worker = self.id, ?state, "state change");
        }

        tracing::debug!(
            worker = self.id,
            processed = report.processed.len(),
            raced = report.raced,
            "no candidates left"
        );
        Ok(report)
    }

    /// One claim attempt.
    ///
    /// On `Some(job)` the row has been committed as Claimed. On `None`
    /// nothing was written. On error the transaction is rolled back.
    pub async fn claim(&self, session: &mut dyn JobSession) -> Result<Option<JobId>, StoreError> {
        let claimed = self.try_claim(session).await;
        if claimed.is_err()
            && let Err(err) = session.rollback().await
        {
            tracing::warn!(worker = self.id, error = %err, "rollback after failed claim");
        }
        claimed
    }

    async fn try_claim(&self, session: &mut dyn JobSession) -> Result<Option<JobId>, StoreError> {
        let Some(job) = self.strategy.select(session, self.experiment).await? else {
            session.rollback().await?;
            return Ok(None);
        };
        session.set_status(job, JobStatus::Claimed, None).await?;
        session.commit().await?;
        tracing::debug!(worker = self.id, %job, strategy = %self.strategy.kind(), "claimed");
        Ok(Some(job))
    }

    /// Run the processor and record the result as Done.
    pub async fn process(&self, session: &mut dyn JobSession, job: JobId) -> Result<(), DispatchError> {
        let claimed = ClaimedJob {
            id: job,
            experiment: self.experiment,
        };
        let result_code = self
            .processor
            .process(&claimed)
            .await
            .map_err(|message| DispatchError::Processing { job, message })?;

        let finished = async {
            session
                .set_status(job, JobStatus::Done, Some(result_code))
                .await?;
            session.commit().await
        }
        .await;
        if let Err(err) = finished {
            if let Err(rollback) = session.rollback().await {
                tracing::warn!(worker = self.id, %job, error = %rollback, "rollback after failed finish");
            }
            return Err(err.into());
        }
        tracing::debug!(worker = self.id, %job, result_code, "done");
        Ok(())
    }

    /// Re-check after an empty selection; FloorRandomLock can miss while
    /// rows are still open.
    async fn candidates_remain(&self, session: &mut dyn JobSession) -> Result<bool, StoreError> {
        let remaining = session.count_candidates(self.experiment).await?;
        session.rollback().await?;
        Ok(remaining > 0)
    }
}
