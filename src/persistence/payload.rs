//! Job payload storage - one JSON document per job

use crate::core::Operation;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything a node needs to execute a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_id: String,
    pub artifact_id: String,
    pub component_id: String,
    pub iteration: u32,
    pub stage: u32,
    pub operation: Operation,
}

/// Where job payloads live
#[async_trait::async_trait]
pub trait PayloadStore: Send + Sync {
    /// Reserve the location of a job payload, returning its path
    async fn store(&self, job_id: &str) -> Result<String>;

    /// Write a payload to a path returned by `store`
    async fn save(&self, path: &str, payload: &JobPayload) -> Result<()>;

    /// Read a payload back
    async fn load(&self, path: &str) -> Result<JobPayload>;
}

/// Payload store on the local filesystem
///
/// Layout: `<root>/<job_id>/<job_id>.json`
#[derive(Debug, Clone)]
pub struct FsPayloadStore {
    root: PathBuf,
}

impl FsPayloadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait::async_trait]
impl PayloadStore for FsPayloadStore {
    async fn store(&self, job_id: &str) -> Result<String> {
        let dir = self.root.join(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir.join(format!("{}.json", job_id)).to_string_lossy().into_owned())
    }

    async fn save(&self, path: &str, payload: &JobPayload) -> Result<()> {
        let json = serde_json::to_vec_pretty(payload)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    async fn load(&self, path: &str) -> Result<JobPayload> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
