//! Error types shared by the coordinator, the lock graph and the pipeline model

use crate::core::JobStatus;
use thiserror::Error;

/// Errors raised by the scheduling core
#[derive(Debug, Error)]
pub enum Error {
    /// The expected status/owner precondition of a transition did not hold
    #[error(
        "component={component_id}: artifact={artifact_id} with job={job_id} in status {expected} not found (requested {requested})"
    )]
    StateConflict {
        job_id: String,
        artifact_id: String,
        component_id: String,
        expected: JobStatus,
        requested: JobStatus,
    },

    /// The requested transition moves backward or skips a state
    #[error("job={job_id}: illegal transition from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// A lock edge would cross artifact boundaries
    #[error("job={job_id}: cannot lock job={next_id}, different artifacts ({artifact_id} != {next_artifact_id})")]
    LockMismatch {
        job_id: String,
        next_id: String,
        artifact_id: String,
        next_artifact_id: String,
    },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// An operation failed while running against an environment
    #[error("execution failed: {0}")]
    Execution(String),

    #[cfg(feature = "sqlite")]
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::StateConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
