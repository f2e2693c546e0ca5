//! Dependency lock graph - a job may not run while an incoming edge is locked

use crate::{
    core::{Job, JobLock},
    error::{Error, Result},
    persistence::JobRepository,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a batch of lock insertions
#[derive(Debug, Default)]
pub struct LockReport {
    /// Edges that were created
    pub created: Vec<JobLock>,
    /// Dependents that were skipped, as `LockMismatch` errors
    pub skipped: Vec<Error>,
}

impl LockReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Lock edges between jobs of the same artifact
#[derive(Clone)]
pub struct LockGraph {
    repo: Arc<dyn JobRepository>,
}

impl LockGraph {
    pub fn new(repo: Arc<dyn JobRepository>) -> Self {
        Self { repo }
    }

    /// Lock every dependent behind `job`
    ///
    /// Dependents of another artifact are skipped and reported; the other
    /// edges are still created.
    pub async fn add_locks(&self, job: &Job, dependents: &[Job]) -> Result<LockReport> {
        let mut report = LockReport::default();

        for next in dependents {
            if next.artifact_id != job.artifact_id {
                warn!(
                    "component={} job={} artifact={}: cannot lock job={} of artifact={}",
                    job.component_id, job.id, job.artifact_id, next.id, next.artifact_id
                );
                report.skipped.push(Error::LockMismatch {
                    job_id: job.id.clone(),
                    next_id: next.id.clone(),
                    artifact_id: job.artifact_id.clone(),
                    next_artifact_id: next.artifact_id.clone(),
                });
                continue;
            }

            let lock = self.repo.create_lock(&job.artifact_id, &job.id, &next.id).await?;
            debug!("artifact={}: job={} locks job={}", job.artifact_id, job.id, next.id);
            report.created.push(lock);
        }

        Ok(report)
    }

    /// Release every edge leaving `job`
    pub async fn unlock(&self, job: &Job) -> Result<u64> {
        let released = self.repo.unlock(&job.id).await?;
        debug!(
            "component={} job={} artifact={}: released {} lock(s)",
            job.component_id, job.id, job.artifact_id, released
        );
        Ok(released)
    }

    /// True while any edge into `job` is still locked
    pub async fn is_locked(&self, job: &Job) -> Result<bool> {
        let incoming = self.repo.list_locks_to(&job.id).await?;
        Ok(incoming.iter().any(|l| l.locked))
    }

    /// Edges pointing at `job`
    pub async fn list_job_locks_for(&self, job: &Job) -> Result<Vec<JobLock>> {
        self.repo.list_locks_to(&job.id).await
    }

    /// Edges leaving `job`
    pub async fn list_jobs_locked(&self, job: &Job) -> Result<Vec<JobLock>> {
        self.repo.list_locks_from(&job.id).await
    }

    /// Jobs of the artifact with no locked incoming edge, in creation order
    pub async fn list_unlocked(&self, artifact_id: &str) -> Result<Vec<Job>> {
        self.repo.list_unlocked(artifact_id).await
    }
}
