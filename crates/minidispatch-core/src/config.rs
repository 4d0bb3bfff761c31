//! Startup configuration shared by the binary and the coordinator.

use std::fmt;
use std::time::Duration;

use sqlx::mysql::MySqlConnectOptions;

use crate::domain::{DEFAULT_RESULT_CODE, ExperimentId};
use crate::error::ConfigError;
use crate::strategy::StrategyKind;

pub const DEFAULT_PORT: u16 = 3306;

/// Monitor sampling period.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(2);

/// Credentials for the MySQL job store.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl StoreCredentials {
    pub fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// What a dispatch run does, independent of which store it talks to.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub workers: usize,
    pub strategy: StrategyKind,
    pub experiment: ExperimentId,
    pub monitor_interval: Duration,
    pub result_code: i32,
    /// Seed for client-side randomness (FloorRandomLock). `None` uses entropy.
    pub seed: Option<u64>,
}

impl DispatchConfig {
    pub fn new(workers: usize, strategy: StrategyKind, experiment: ExperimentId) -> Self {
        Self {
            workers,
            strategy,
            experiment,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            result_code: DEFAULT_RESULT_CODE,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(())
    }
}
