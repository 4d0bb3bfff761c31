//! Ports - 抽象化レイヤー（abstraction layer）
//!
//! Each trait is the seam to something outside the core: the job table and
//! the work done per job. Adapters live in `impls`.

pub mod job_store;
pub mod processor;

pub use self::job_store::{JobSession, JobStore};
pub use self::processor::{ClaimedJob, FixedResultProcessor, JobProcessor};
