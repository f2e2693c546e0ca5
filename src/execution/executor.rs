//! Job executor - runs a dispatched job's operation on a node

use crate::{
    core::{Dataset, EnvValue, Environment, Job},
    error::{Error, Result},
    persistence::{JobPayload, PayloadStore},
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Node-local state an operation runs against
#[async_trait::async_trait]
pub trait Workspace: Send + Sync {
    /// Build the environment a job starts from
    async fn environment(&self, payload: &JobPayload) -> Result<Environment>;

    /// Keep the outputs of a finished job for later jobs of its artifact
    async fn commit(&self, payload: &JobPayload, env: Environment) -> Result<()>;
}

/// Workspace backed by datasets held in memory
///
/// Source jobs (stage 0) reload the raw datasets, so every iteration
/// starts from the node's own data while models and scalars written by
/// earlier rounds carry over.
#[derive(Default)]
pub struct LocalWorkspace {
    datasets: HashMap<String, Dataset>,
    committed: Mutex<HashMap<String, Environment>>,
}

impl LocalWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, name: impl Into<String>, dataset: Dataset) -> Self {
        self.datasets.insert(name.into(), dataset);
        self
    }

    /// Environment committed so far for an artifact
    pub async fn snapshot(&self, artifact_id: &str) -> Option<Environment> {
        self.committed.lock().await.get(artifact_id).cloned()
    }
}

#[async_trait::async_trait]
impl Workspace for LocalWorkspace {
    async fn environment(&self, payload: &JobPayload) -> Result<Environment> {
        let mut env = self
            .committed
            .lock()
            .await
            .get(&payload.artifact_id)
            .cloned()
            .unwrap_or_default();

        if payload.stage == 0 {
            for name in &payload.operation.slots().data_names {
                let dataset = self
                    .datasets
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::not_found("dataset", name.clone()))?;
                env.set(name.clone(), EnvValue::Dataset(dataset));
            }
        }

        Ok(env)
    }

    async fn commit(&self, payload: &JobPayload, env: Environment) -> Result<()> {
        self.committed
            .lock()
            .await
            .insert(payload.artifact_id.clone(), env);
        Ok(())
    }
}

/// Loads a job's payload and executes its operation
pub struct JobExecutor {
    payloads: Arc<dyn PayloadStore>,
    workspace: Arc<dyn Workspace>,
}

impl JobExecutor {
    pub fn new(payloads: Arc<dyn PayloadStore>, workspace: Arc<dyn Workspace>) -> Self {
        Self { payloads, workspace }
    }

    /// Execute a RUNNING job and return the environment it produced
    pub async fn execute(&self, job: &Job) -> Result<Environment> {
        let payload = self.payloads.load(&job.path).await?;
        if payload.job_id != job.id {
            return Err(Error::Execution(format!(
                "payload at {} belongs to job={}, not job={}",
                job.path, payload.job_id, job.id
            )));
        }

        info!(
            "component={} job={} artifact={}: executing {} (iteration {}, stage {})",
            job.component_id,
            job.id,
            job.artifact_id,
            payload.operation.kind(),
            payload.iteration,
            payload.stage
        );

        let env = self.workspace.environment(&payload).await?;
        let env = payload.operation.exec(env)?;
        debug!(
            "job={}: environment now holds {:?}",
            job.id,
            env.names().collect::<Vec<_>>()
        );

        self.workspace.commit(&payload, env.clone()).await?;
        Ok(env)
    }
}
