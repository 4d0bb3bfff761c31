use thiserror::Error;

use crate::domain::{JobId, JobStatus};

/// Errors raised by a job store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (startup or lost connection).
    #[error("store connection failed: {0}")]
    Connection(String),

    /// The store rejected or failed to run an operation.
    #[error("store query failed: {0}")]
    Query(String),

    /// `set_status` found the row in a state it may not leave that way.
    #[error("{job} cannot move from {from} to {to}")]
    InvalidTransition {
        job: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("{0} does not exist")]
    UnknownJob(JobId),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

/// Errors surfaced by workers, the monitor and the coordinator.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("processing {job} failed: {message}")]
    Processing { job: JobId, message: String },

    #[error("task {name} did not finish: {message}")]
    Join { name: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Invalid startup configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown strategy selector '{0}' (expected 0, 1 or 2)")]
    UnknownStrategy(String),

    #[error("monitor interval must be greater than zero")]
    ZeroInterval,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => StoreError::Connection(err.to_string()),
            _ => StoreError::Query(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_failures_are_connection_errors() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_connection());
        assert!(StoreError::from(sqlx::Error::PoolClosed).is_connection());
    }

    #[test]
    fn other_sqlx_failures_are_query_errors() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Query(_)));
    }

    #[test]
    fn invalid_transition_names_both_states() {
        let err = StoreError::InvalidTransition {
            job: JobId::new(3),
            from: JobStatus::Done,
            to: JobStatus::Claimed,
        };
        assert_eq!(err.to_string(), "job-3 cannot move from done to claimed");
    }
}
