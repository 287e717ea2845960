//! Concurrency and resource-bounding primitives: write serialization per
//! session, the background index-job queue, and context-flush tracking.

pub mod flush_tracker;
pub mod index_worker;
pub mod write_lanes;

pub use flush_tracker::{FlushConfig, FlushTracker};
pub use index_worker::{EnqueueOutcome, IndexJob, IndexWorker, JobRunner, JobStatus, TaskType};
pub use write_lanes::{WriteLaneCoordinator, WriteLaneStatus};
