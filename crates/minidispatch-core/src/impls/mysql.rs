//! MySQL job store (sqlx).
//!
//! Works against the `ExperimentResults` table:
//!
//! | column                    | meaning                     |
//! |---------------------------|-----------------------------|
//! | `idJob`                   | job id (primary key)        |
//! | `Experiment_idExperiment` | owning experiment           |
//! | `status`                  | -1 pending, 0 claimed, 1 done |
//! | `resultCode`              | outcome written on Done     |
//!
//! Row locks are InnoDB `SELECT ... FOR UPDATE` locks; they last until the
//! session's transaction commits or rolls back.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::{MySql, Transaction};

use crate::config::StoreCredentials;
use crate::domain::{ExperimentId, JobId, JobStatus};
use crate::error::StoreError;
use crate::ports::{JobSession, JobStore};

const COUNT_BY_STATUS: &str = "\
    SELECT COUNT(idJob) FROM ExperimentResults \
    WHERE Experiment_idExperiment = ? AND status = ?";

const LOCK_AT_OFFSET: &str = "\
    SELECT idJob FROM ExperimentResults \
    WHERE Experiment_idExperiment = ? AND status = ? \
    ORDER BY idJob LIMIT ?, 1 FOR UPDATE";

const LOCK_RANDOM: &str = "\
    SELECT idJob FROM ExperimentResults \
    WHERE Experiment_idExperiment = ? AND status = ? \
    ORDER BY RAND() LIMIT 1 FOR UPDATE";

const LOCK_FIRST: &str = "\
    SELECT idJob FROM ExperimentResults \
    WHERE Experiment_idExperiment = ? AND status = ? \
    ORDER BY idJob LIMIT 1 FOR UPDATE";

const SET_STATUS: &str = "\
    UPDATE ExperimentResults SET status = ?, resultCode = COALESCE(?, resultCode) \
    WHERE idJob = ? AND status = ?";

const FIND_STATUS: &str = "SELECT status FROM ExperimentResults WHERE idJob = ?";

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Job store backed by a MySQL connection pool.
///
/// Every session borrows its own pooled connection for the length of a
/// transaction, so the pool should have one connection per worker plus one
/// for the monitor.
#[derive(Clone)]
pub struct MySqlJobStore {
    pool: MySqlPool,
}

impl MySqlJobStore {
    /// Connect eagerly so an unreachable server fails at startup.
    pub async fn connect(
        credentials: &StoreCredentials,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(credentials.connect_options())
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        tracing::debug!(host = %credentials.host, database = %credentials.database, "connected to job store");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for MySqlJobStore {
    async fn session(&self) -> Result<Box<dyn JobSession>, StoreError> {
        Ok(Box::new(MySqlSession {
            pool: self.pool.clone(),
            tx: None,
        }))
    }
}

/// Session with a lazily opened transaction.
pub struct MySqlSession {
    pool: MySqlPool,
    tx: Option<Transaction<'static, MySql>>,
}

impl MySqlSession {
    async fn transaction(&mut self) -> Result<&mut Transaction<'static, MySql>, StoreError> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => self.pool.begin().await?,
        };
        Ok(self.tx.insert(tx))
    }

    async fn lock_one(
        &mut self,
        sql: &'static str,
        experiment: ExperimentId,
        offset: Option<u64>,
    ) -> Result<Option<JobId>, StoreError> {
        let tx = self.transaction().await?;
        let mut query = sqlx::query_scalar::<_, i64>(sql)
            .bind(experiment.get())
            .bind(JobStatus::Pending.code());
        if let Some(offset) = offset {
            query = query.bind(offset);
        }
        let id = query.fetch_optional(&mut **tx).await?;
        Ok(id.map(JobId::new))
    }
}

#[async_trait]
impl JobSession for MySqlSession {
    async fn count_candidates(&mut self, experiment: ExperimentId) -> Result<u64, StoreError> {
        let tx = self.transaction().await?;
        let count: i64 = sqlx::query_scalar(COUNT_BY_STATUS)
            .bind(experiment.get())
            .bind(JobStatus::Pending.code())
            .fetch_one(&mut **tx)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn lock_one_at_offset(
        &mut self,
        experiment: ExperimentId,
        offset: u64,
    ) -> Result<Option<JobId>, StoreError> {
        self.lock_one(LOCK_AT_OFFSET, experiment, Some(offset)).await
    }

    async fn lock_one_random(
        &mut self,
        experiment: ExperimentId,
    ) -> Result<Option<JobId>, StoreError> {
        self.lock_one(LOCK_RANDOM, experiment, None).await
    }

    async fn lock_one_first(
        &mut self,
        experiment: ExperimentId,
    ) -> Result<Option<JobId>, StoreError> {
        self.lock_one(LOCK_FIRST, experiment, None).await
    }

    async fn set_status(
        &mut self,
        job: JobId,
        status: JobStatus,
        result_code: Option<i32>,
    ) -> Result<(), StoreError> {
        let tx = self.transaction().await?;
        if let Some(expected) = status.predecessor() {
            let updated = sqlx::query(SET_STATUS)
                .bind(status.code())
                .bind(result_code)
                .bind(job.get())
                .bind(expected.code())
                .execute(&mut **tx)
                .await?;
            if updated.rows_affected() == 1 {
                return Ok(());
            }
        }

        // Nothing changed: find out why.
        let current: Option<i32> = sqlx::query_scalar(FIND_STATUS)
            .bind(job.get())
            .fetch_optional(&mut **tx)
            .await?;
        let Some(code) = current else {
            return Err(StoreError::UnknownJob(job));
        };
        let from = JobStatus::from_code(code)
            .ok_or_else(|| StoreError::Query(format!("{job} has unknown status {code}")))?;
        Err(StoreError::InvalidTransition {
            job,
            from,
            to: status,
        })
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn count_by_status(
        &mut self,
        experiment: ExperimentId,
        status: JobStatus,
    ) -> Result<u64, StoreError> {
        // Autocommit read on the pool so the count is never a stale snapshot.
        let count: i64 = sqlx::query_scalar(COUNT_BY_STATUS)
            .bind(experiment.get())
            .bind(status.code())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
