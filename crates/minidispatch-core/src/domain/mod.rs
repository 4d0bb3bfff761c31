//! Domain model (IDs, job status, job rows, counters).

pub mod ids;
pub mod job;
pub mod status;

pub use ids::{ExperimentId, JobId};
pub use job::{DEFAULT_RESULT_CODE, ExperimentCounters, JobRecord};
pub use status::JobStatus;
