//! lockstep - a job coordinator that schedules staged pipelines across
//! worker nodes behind a dependency lock graph

pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use crate::core::{Artifact, Job, JobLock, JobStatus, Operation, Pipeline};
pub use error::{Error, Result};
pub use execution::{Coordinator, CoordinatorEvent, Dispatcher, JobExecutor, LockGraph, NodeRunner};
pub use persistence::{FsPayloadStore, InMemoryJobRepository, JobRepository, PayloadStore};
