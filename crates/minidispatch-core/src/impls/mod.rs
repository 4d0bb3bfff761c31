//! Impls - ジョブストアの実装（job store adapters）
//!
//! - **InMemoryJobStore**: row locks and transactions in process, for tests
//!   and demo runs
//! - **MySqlJobStore**: the `ExperimentResults` table through sqlx

pub mod memory;
pub mod mysql;

pub use self::memory::{InMemoryJobStore, InMemorySession, Transition};
pub use self::mysql::{MySqlJobStore, MySqlSession};
