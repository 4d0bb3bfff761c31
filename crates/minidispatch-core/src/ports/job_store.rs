//! JobStore port - the transactional job table.
//!
//! The job table is the only shared mutable resource. Everything the core
//! does to it goes through these two traits:
//! - `JobStore` is shared by all workers and opens sessions.
//! - `JobSession` is owned by exactly one worker (or the monitor).
//!
//! # Transactions
//! A session always has an implicit open transaction, like a database
//! connection with autocommit off. Locking reads and `set_status` join that
//! transaction; `commit` / `rollback` end it and release every row lock the
//! session holds. The next call starts a new one.

use async_trait::async_trait;

use crate::domain::{ExperimentCounters, ExperimentId, JobId, JobStatus};
use crate::error::StoreError;

/// Entry point to a job store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Open an independent session (its own connection / transaction scope).
    async fn session(&self) -> Result<Box<dyn JobSession>, StoreError>;
}

/// One store session.
///
/// # Locking
/// The `lock_one_*` methods only consider candidate rows (status Pending
/// for the experiment). When the chosen row is locked by another session
/// they wait until it is released, then look again. On `Some(id)` the row
/// stays locked until this session commits or rolls back.
#[async_trait]
pub trait JobSession: Send {
    /// Number of candidate rows (non-locking read).
    async fn count_candidates(&mut self, experiment: ExperimentId) -> Result<u64, StoreError>;

    /// Lock the candidate at `offset` in primary-key order.
    /// `None` when the offset is past the end of the candidate set.
    async fn lock_one_at_offset(
        &mut self,
        experiment: ExperimentId,
        offset: u64,
    ) -> Result<Option<JobId>, StoreError>;

    /// Lock one candidate chosen uniformly at random by the store.
    async fn lock_one_random(&mut self, experiment: ExperimentId)
    -> Result<Option<JobId>, StoreError>;

    /// Lock the candidate with the smallest id.
    async fn lock_one_first(&mut self, experiment: ExperimentId)
    -> Result<Option<JobId>, StoreError>;

    /// Move a job to `status` inside the current transaction.
    ///
    /// Only applies when the row currently sits in `status.predecessor()`;
    /// anything else is `StoreError::InvalidTransition`. `result_code`
    /// of `None` leaves the stored code untouched.
    async fn set_status(
        &mut self,
        job: JobId,
        status: JobStatus,
        result_code: Option<i32>,
    ) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Fresh count of committed rows in `status`, outside the claim transaction.
    async fn count_by_status(
        &mut self,
        experiment: ExperimentId,
        status: JobStatus,
    ) -> Result<u64, StoreError>;

    /// All three counts, each read fresh.
    async fn counters(&mut self, experiment: ExperimentId) -> Result<ExperimentCounters, StoreError> {
        let mut counters = ExperimentCounters::default();
        for status in JobStatus::ALL {
            counters.set(status, self.count_by_status(experiment, status).await?);
        }
        Ok(counters)
    }
}
