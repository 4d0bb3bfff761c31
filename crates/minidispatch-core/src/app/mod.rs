//! App - アプリケーション層
//!
//! ports を組み合わせて 1 回の dispatch run を構成します。
//!
//! - **Worker**: claim → process → commit until no candidate is left
//! - **Monitor**: periodic throughput samples from the Done count
//! - **Coordinator**: pre-flight check, spawns N workers plus one monitor

pub mod coordinator;
pub mod monitor;
pub mod worker_loop;

pub use self::coordinator::{Coordinator, MonitorOutcome, RunReport, WorkerOutcome};
pub use self::monitor::{Monitor, MonitorReport, StopReason, ThroughputSample};
pub use self::worker_loop::{Worker, WorkerReport, WorkerState};
