//! Persistence layer for jobs, lock edges and job payloads

pub mod payload;

#[cfg(feature = "sqlite")]
pub mod store;

pub use payload::{FsPayloadStore, JobPayload, PayloadStore};

#[cfg(feature = "sqlite")]
pub use store::SqliteJobRepository;

use crate::core::{Job, JobFilter, JobLock, JobStatus, NewJob};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio::sync::Mutex;

/// Storage contract for the job/lock graph
///
/// Every method is a single atomic call against the backing store.
#[async_trait::async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job
    async fn create_job(&self, job: NewJob) -> Result<Job>;

    /// Load a job by ID
    async fn get_job(&self, job_id: &str) -> Result<Job>;

    /// Check-and-set the status of a job
    ///
    /// Succeeds only if the stored job has `expected` status and is owned
    /// by `component_id`; fails with `StateConflict` otherwise.
    async fn transition(
        &self,
        job_id: &str,
        component_id: &str,
        expected: JobStatus,
        next: JobStatus,
        now: DateTime<Utc>,
    ) -> Result<Job>;

    /// List jobs matching a filter, in creation order
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Count jobs matching a filter
    async fn count_jobs(&self, filter: &JobFilter) -> Result<u64>;

    /// Oldest SCHEDULED job of a component, optionally within one artifact
    async fn next_scheduled(&self, component_id: &str, artifact_id: Option<&str>) -> Result<Option<Job>>;

    /// Insert a locked edge `job_id -> next_id`
    async fn create_lock(&self, artifact_id: &str, job_id: &str, next_id: &str) -> Result<JobLock>;

    /// Unlock every edge leaving `job_id`, returning how many changed
    async fn unlock(&self, job_id: &str) -> Result<u64>;

    /// Edges leaving `job_id`
    async fn list_locks_from(&self, job_id: &str) -> Result<Vec<JobLock>>;

    /// Edges entering `job_id`
    async fn list_locks_to(&self, job_id: &str) -> Result<Vec<JobLock>>;

    /// Jobs of the artifact that are not the target of any locked edge
    async fn list_unlocked(&self, artifact_id: &str) -> Result<Vec<Job>>;
}

#[derive(Default)]
struct Graph {
    /// Jobs in insertion order
    jobs: Vec<Job>,
    locks: Vec<JobLock>,
}

impl Graph {
    fn job_mut(&mut self, job_id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == job_id)
    }
}

/// In-memory repository (for tests or ephemeral runs)
///
/// A single mutex guards jobs and locks, so every call is atomic.
pub struct InMemoryJobRepository {
    graph: Mutex<Graph>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self {
            graph: Mutex::new(Graph::default()),
        }
    }
}

impl Default for InMemoryJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create_job(&self, job: NewJob) -> Result<Job> {
        let mut graph = self.graph.lock().await;
        if graph.jobs.iter().any(|j| j.id == job.id) {
            return Err(Error::Execution(format!("job={} already exists", job.id)));
        }
        let job = Job::from_new(job, Utc::now());
        graph.jobs.push(job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Result<Job> {
        let graph = self.graph.lock().await;
        graph
            .jobs
            .iter()
            .find(|j| j.id == job_id)
            .cloned()
            .ok_or_else(|| Error::not_found("job", job_id))
    }

    async fn transition(
        &self,
        job_id: &str,
        component_id: &str,
        expected: JobStatus,
        next: JobStatus,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let mut graph = self.graph.lock().await;
        match graph.job_mut(job_id) {
            Some(job) if job.status == expected && job.component_id == component_id => {
                job.stamp(next, now);
                Ok(job.clone())
            }
            found => Err(Error::StateConflict {
                job_id: job_id.to_string(),
                artifact_id: found.map(|j| j.artifact_id.clone()).unwrap_or_default(),
                component_id: component_id.to_string(),
                expected,
                requested: next,
            }),
        }
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let graph = self.graph.lock().await;
        Ok(graph.jobs.iter().filter(|j| filter.matches(j)).cloned().collect())
    }

    async fn count_jobs(&self, filter: &JobFilter) -> Result<u64> {
        let graph = self.graph.lock().await;
        Ok(graph.jobs.iter().filter(|j| filter.matches(j)).count() as u64)
    }

    async fn next_scheduled(&self, component_id: &str, artifact_id: Option<&str>) -> Result<Option<Job>> {
        let graph = self.graph.lock().await;
        // min_by_key keeps the first of equal keys, i.e. insertion order
        Ok(graph
            .jobs
            .iter()
            .filter(|j| j.component_id == component_id && j.status == JobStatus::Scheduled)
            .filter(|j| artifact_id.map_or(true, |a| a == j.artifact_id))
            .min_by_key(|j| j.creation_time)
            .cloned())
    }

    async fn create_lock(&self, artifact_id: &str, job_id: &str, next_id: &str) -> Result<JobLock> {
        let mut graph = self.graph.lock().await;
        let lock = JobLock {
            id: graph.locks.len() as i64 + 1,
            artifact_id: artifact_id.to_string(),
            job_id: job_id.to_string(),
            next_id: next_id.to_string(),
            locked: true,
        };
        graph.locks.push(lock.clone());
        Ok(lock)
    }

    async fn unlock(&self, job_id: &str) -> Result<u64> {
        let mut graph = self.graph.lock().await;
        let mut changed = 0;
        for lock in graph.locks.iter_mut().filter(|l| l.job_id == job_id && l.locked) {
            lock.locked = false;
            changed += 1;
        }
        Ok(changed)
    }

    async fn list_locks_from(&self, job_id: &str) -> Result<Vec<JobLock>> {
        let graph = self.graph.lock().await;
        Ok(graph.locks.iter().filter(|l| l.job_id == job_id).cloned().collect())
    }

    async fn list_locks_to(&self, job_id: &str) -> Result<Vec<JobLock>> {
        let graph = self.graph.lock().await;
        Ok(graph.locks.iter().filter(|l| l.next_id == job_id).cloned().collect())
    }

    async fn list_unlocked(&self, artifact_id: &str) -> Result<Vec<Job>> {
        let graph = self.graph.lock().await;
        let locked: HashSet<&str> = graph
            .locks
            .iter()
            .filter(|l| l.locked && l.artifact_id == artifact_id)
            .map(|l| l.next_id.as_str())
            .collect();

        Ok(graph
            .jobs
            .iter()
            .filter(|j| j.artifact_id == artifact_id && !locked.contains(j.id.as_str()))
            .cloned()
            .collect())
    }
}
