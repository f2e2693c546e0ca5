//! Node runner - polls the coordinator and executes jobs with bounded concurrency

use crate::{
    core::Job,
    error::Result,
    execution::{coordinator::Coordinator, executor::JobExecutor},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Outcome counts of one node run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeSummary {
    pub completed: usize,
    pub failed: usize,
}

/// A worker node bound to one component
pub struct NodeRunner {
    component_id: String,
    coordinator: Arc<Coordinator>,
    executor: Arc<JobExecutor>,
    max_workers: usize,
    poll_interval: Duration,
}

impl NodeRunner {
    pub fn new(
        component_id: impl Into<String>,
        coordinator: Arc<Coordinator>,
        executor: Arc<JobExecutor>,
        max_workers: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            component_id: component_id.into(),
            coordinator,
            executor,
            max_workers: max_workers.max(1),
            poll_interval,
        }
    }

    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    /// Run jobs of one artifact until it has nothing queued or executing
    ///
    /// Jobs of other artifacts queued for the same component are left alone.
    pub async fn run(&self, artifact_id: &str) -> Result<NodeSummary> {
        let mut summary = NodeSummary::default();
        let mut workers: JoinSet<(Job, Result<()>)> = JoinSet::new();

        loop {
            while workers.len() < self.max_workers {
                match self.coordinator.dispatch_artifact(&self.component_id, artifact_id).await? {
                    Some(job) => {
                        let executor = self.executor.clone();
                        workers.spawn(async move {
                            let result = executor.execute(&job).await.map(|_| ());
                            (job, result)
                        });
                    }
                    None => break,
                }
            }

            if workers.is_empty() {
                let status = self.coordinator.status(artifact_id).await?;
                if status.is_settled() {
                    info!(
                        "component={} artifact={}: idle ({} completed, {} failed)",
                        self.component_id, artifact_id, summary.completed, summary.failed
                    );
                    return Ok(summary);
                }
                debug!("component={}: nothing to do, polling again", self.component_id);
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            match tokio::time::timeout(self.poll_interval, workers.join_next()).await {
                Ok(Some(Ok((job, result)))) => self.report(&job, result, &mut summary).await?,
                Ok(Some(Err(e))) => {
                    // the job stays RUNNING until its lease expires
                    warn!("component={}: worker task aborted: {}", self.component_id, e);
                }
                Ok(None) | Err(_) => {}
            }
        }
    }

    async fn report(&self, job: &Job, result: Result<()>, summary: &mut NodeSummary) -> Result<()> {
        let reported = match result {
            Ok(()) => {
                summary.completed += 1;
                self.coordinator.complete(&job.id, &self.component_id).await
            }
            Err(e) => {
                summary.failed += 1;
                self.coordinator
                    .fail(&job.id, &self.component_id, &e.to_string())
                    .await
            }
        };

        match reported {
            Ok(_) => Ok(()),
            // reaped while executing
            Err(e) if e.is_conflict() => {
                warn!("{}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
