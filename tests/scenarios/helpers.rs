//! Test utility functions for lockstep

#![allow(dead_code)]

use lockstep::core::config::ArtifactConfig;
use lockstep::core::{Artifact, Dataset, Job, JobStatus, Row};
use lockstep::execution::{Coordinator, JobExecutor, LocalWorkspace, NodeRunner};
use lockstep::persistence::{FsPayloadStore, InMemoryJobRepository, JobRepository, PayloadStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A coordinator over an in-memory repository and a scratch payload root
pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub repo: Arc<dyn JobRepository>,
    pub payloads: Arc<dyn PayloadStore>,
    root: PathBuf,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_repo(Arc::new(InMemoryJobRepository::new()))
    }

    pub fn with_repo(repo: Arc<dyn JobRepository>) -> Self {
        let root = scratch_dir("payloads");
        let payloads: Arc<dyn PayloadStore> = Arc::new(FsPayloadStore::new(root.clone()));
        let coordinator = Arc::new(Coordinator::new(repo.clone(), payloads.clone()));
        Self {
            coordinator,
            repo,
            payloads,
            root,
        }
    }

    /// A node for `component` holding `json` rows as its local data
    pub fn node(&self, component: &str, json: &str, max_workers: usize) -> (NodeRunner, Arc<LocalWorkspace>) {
        let workspace = Arc::new(LocalWorkspace::new().with_dataset("data", rows(json)));
        let executor = Arc::new(JobExecutor::new(self.payloads.clone(), workspace.clone()));
        let node = NodeRunner::new(
            component,
            self.coordinator.clone(),
            executor,
            max_workers,
            Duration::from_millis(5),
        );
        (node, workspace)
    }

    pub async fn jobs_of(&self, artifact_id: &str, component: &str) -> Vec<Job> {
        self.coordinator
            .jobs(artifact_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|j| j.component_id == component)
            .collect()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.root).ok();
    }
}

pub fn scratch_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("lockstep-{}-{}", prefix, uuid::Uuid::new_v4()))
}

pub fn rows(json: &str) -> Dataset {
    let rows: Vec<Row> = serde_json::from_str(json).unwrap();
    Dataset::from_rows(rows)
}

pub fn artifact(yaml: &str) -> Artifact {
    ArtifactConfig::from_yaml(yaml).unwrap().compile().unwrap()
}

pub fn statuses(jobs: &[Job]) -> Vec<JobStatus> {
    jobs.iter().map(|j| j.status).collect()
}
