//! Dispatcher - lifecycle transitions and first-come-first-served dispatch

use crate::{
    core::{Job, JobFilter, JobStatus},
    error::{Error, Result},
    execution::locks::LockGraph,
    persistence::JobRepository,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Moves jobs through their lifecycle and hands them to components
#[derive(Clone)]
pub struct Dispatcher {
    repo: Arc<dyn JobRepository>,
    locks: LockGraph,
}

impl Dispatcher {
    pub fn new(repo: Arc<dyn JobRepository>) -> Self {
        let locks = LockGraph::new(repo.clone());
        Self { repo, locks }
    }

    pub fn locks(&self) -> &LockGraph {
        &self.locks
    }

    /// Check-and-set a job's status
    ///
    /// Illegal transitions are rejected before touching storage; the
    /// stored status and owner must then match `expected` and `job`.
    pub async fn transition(&self, job: &Job, expected: JobStatus, next: JobStatus) -> Result<Job> {
        if !expected.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                job_id: job.id.clone(),
                from: expected,
                to: next,
            });
        }

        let updated = self
            .repo
            .transition(&job.id, &job.component_id, expected, next, Utc::now())
            .await?;

        info!(
            "component={} job={} artifact={}: {} -> {}",
            updated.component_id, updated.id, updated.artifact_id, expected, next
        );
        Ok(updated)
    }

    pub async fn schedule(&self, job: &Job) -> Result<Job> {
        self.transition(job, JobStatus::Waiting, JobStatus::Scheduled).await
    }

    pub async fn start(&self, job: &Job) -> Result<Job> {
        self.transition(job, JobStatus::Scheduled, JobStatus::Running).await
    }

    pub async fn complete(&self, job: &Job) -> Result<Job> {
        self.transition(job, JobStatus::Running, JobStatus::Completed).await
    }

    pub async fn fail(&self, job: &Job) -> Result<Job> {
        self.transition(job, JobStatus::Running, JobStatus::Error).await
    }

    /// Oldest SCHEDULED job of a component
    pub async fn next_job_for(&self, component_id: &str) -> Result<Job> {
        self.next_job_in(component_id, None).await
    }

    /// Oldest SCHEDULED job of a component, restricted to one artifact when given
    pub async fn next_job_in(&self, component_id: &str, artifact_id: Option<&str>) -> Result<Job> {
        self.repo
            .next_scheduled(component_id, artifact_id)
            .await?
            .ok_or_else(|| Error::not_found("scheduled job for component", component_id))
    }

    /// Promote every unlocked WAITING job of the artifact to SCHEDULED
    ///
    /// A job promoted concurrently by another caller is skipped.
    pub async fn schedule_unlocked(&self, artifact_id: &str) -> Result<Vec<Job>> {
        let mut scheduled = Vec::new();

        for job in self.locks.list_unlocked(artifact_id).await? {
            if job.status != JobStatus::Waiting {
                continue;
            }
            match self.schedule(&job).await {
                Ok(job) => scheduled.push(job),
                Err(e) if e.is_conflict() => {
                    debug!("{}", e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(scheduled)
    }

    /// Claim the next job of a component, or `None` when there is nothing to do
    pub async fn dispatch(&self, component_id: &str) -> Result<Option<Job>> {
        self.dispatch_in(component_id, None).await
    }

    /// Like `dispatch`, but only claims jobs of `artifact_id` when given
    pub async fn dispatch_in(&self, component_id: &str, artifact_id: Option<&str>) -> Result<Option<Job>> {
        loop {
            let job = match self.next_job_in(component_id, artifact_id).await {
                Ok(job) => job,
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e),
            };

            match self.start(&job).await {
                Ok(job) => return Ok(Some(job)),
                // lost the race for this job; look again
                Err(e) if e.is_conflict() => {
                    debug!("{}", e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Move RUNNING jobs older than `lease` to ERROR
    pub async fn reap_stalled(&self, lease: Duration) -> Result<Vec<Job>> {
        let cutoff = Utc::now() - lease;
        let running = self
            .repo
            .list_jobs(&JobFilter::default().with_status(JobStatus::Running))
            .await?;

        let mut reaped = Vec::new();
        for job in running {
            let stalled = job.execution_time.map_or(false, |t| t <= cutoff);
            if !stalled {
                continue;
            }
            warn!(
                "component={} job={} artifact={}: lease expired, marking as failed",
                job.component_id, job.id, job.artifact_id
            );
            match self.fail(&job).await {
                Ok(job) => reaped.push(job),
                // finished in the meantime
                Err(e) if e.is_conflict() => debug!("{}", e),
                Err(e) => return Err(e),
            }
        }

        Ok(reaped)
    }
}
