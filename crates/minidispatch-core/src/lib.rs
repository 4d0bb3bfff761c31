//! minidispatch-core
//!
//! Hands out the jobs of one experiment to concurrent workers that share a
//! transactional job table, and reports throughput while they run.
//!
//! # Modules
//! - **domain**: job rows, statuses, ids, counters
//! - **ports**: `JobStore` / `JobSession` and the `JobProcessor` a worker runs
//! - **strategy**: how a worker picks the row to lock
//! - **app**: worker loop, monitor, coordinator
//! - **impls**: in-memory and MySQL stores

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use app::{Coordinator, RunReport};
pub use config::{DispatchConfig, StoreCredentials};
pub use error::{ConfigError, DispatchError, StoreError};
pub use strategy::StrategyKind;
