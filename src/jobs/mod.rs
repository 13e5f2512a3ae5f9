//! Asynchronous job tracking: records, the in-memory store, the runner
//! that drives each job and the retention sweeper.

mod models;
mod runner;
mod store;
mod sweeper;

pub use models::{JobKind, JobPayload, JobRecord, JobStatus, JobUpdate};
pub use runner::{JobRunner, SyncImageError};
pub use store::{JobStore, JobStoreError};
pub use sweeper::JobRetentionSweeper;
