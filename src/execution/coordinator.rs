//! Coordinator - splits artifacts into jobs and drives them to completion

use crate::{
    core::{Artifact, Job, JobFilter, JobStatus, NewJob, Operation, OperationSlots},
    error::{Error, Result},
    execution::{locks::LockGraph, scheduler::Dispatcher},
    persistence::{JobPayload, JobRepository, PayloadStore},
};
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events emitted while artifacts are processed
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    ArtifactSubmitted {
        artifact_id: String,
        name: String,
        jobs: usize,
    },
    JobScheduled {
        job_id: String,
        component_id: String,
    },
    JobDispatched {
        job_id: String,
        component_id: String,
        stage: u32,
        iteration: u32,
    },
    JobCompleted {
        job_id: String,
        component_id: String,
    },
    JobFailed {
        job_id: String,
        component_id: String,
        reason: String,
    },
    JobsUnlocked {
        job_id: String,
        released: u64,
    },
    ArtifactCompleted {
        artifact_id: String,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(CoordinatorEvent) + Send + Sync>;

/// Job counts of one artifact, by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactStatus {
    pub artifact_id: String,
    pub total: u64,
    pub waiting: u64,
    pub scheduled: u64,
    pub running: u64,
    pub completed: u64,
    pub error: u64,
}

impl ArtifactStatus {
    fn count(&mut self, status: JobStatus) {
        self.total += 1;
        match status {
            JobStatus::Waiting => self.waiting += 1,
            JobStatus::Scheduled => self.scheduled += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Error => self.error += 1,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }

    pub fn has_failed(&self) -> bool {
        self.error > 0
    }

    /// No job is queued or executing, so nothing can make progress
    pub fn is_settled(&self) -> bool {
        self.scheduled == 0 && self.running == 0
    }

    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Central authority over the job/lock graph
pub struct Coordinator {
    repo: Arc<dyn JobRepository>,
    payloads: Arc<dyn PayloadStore>,
    dispatcher: Dispatcher,
    event_handlers: Mutex<Vec<EventHandler>>,
    // multi-step updates hold it exclusively; status snapshots share it
    progress: RwLock<()>,
}

impl Coordinator {
    pub fn new(repo: Arc<dyn JobRepository>, payloads: Arc<dyn PayloadStore>) -> Self {
        let dispatcher = Dispatcher::new(repo.clone());
        Self {
            repo,
            payloads,
            dispatcher,
            event_handlers: Mutex::new(Vec::new()),
            progress: RwLock::new(()),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn locks(&self) -> &LockGraph {
        self.dispatcher.locks()
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(CoordinatorEvent) + Send + Sync + 'static,
    {
        self.event_handlers.lock().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    async fn emit_event(&self, event: CoordinatorEvent) {
        let handlers = self.event_handlers.lock().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Materialize an artifact into jobs, payloads and lock edges
    ///
    /// Each component runs one job per pipeline stage (plus the plan) per
    /// iteration. Jobs of a component chain stage by stage; every
    /// component's last job of an iteration locks every component's first
    /// job of the next one. Returns the created jobs in creation order.
    pub async fn submit(&self, artifact: &Artifact) -> Result<Vec<Job>> {
        if artifact.components.is_empty() {
            return Err(Error::Execution(format!(
                "artifact={} has no components",
                artifact.id
            )));
        }

        let _guard = self.progress.write().await;
        let operations = round_operations(artifact);
        let n_components = artifact.components.len() as u32;

        // rounds[iteration][component] = jobs in stage order
        let mut rounds: Vec<Vec<Vec<Job>>> = Vec::new();
        let mut created = Vec::with_capacity(artifact.total_jobs());

        for iteration in 0..artifact.iterations {
            let mut round = Vec::new();
            for component_id in &artifact.components {
                let mut chain = Vec::new();
                for (stage, operation) in operations.iter().enumerate() {
                    let lock_counter = match (stage, iteration) {
                        (0, 0) => 0,
                        (0, _) => n_components,
                        _ => 1,
                    };
                    let job = self
                        .create_job(artifact, component_id, iteration, stage as u32, lock_counter, operation)
                        .await?;
                    created.push(job.clone());
                    chain.push(job);
                }
                round.push(chain);
            }
            rounds.push(round);
        }

        let locks = self.dispatcher.locks();
        for (iteration, round) in rounds.iter().enumerate() {
            for chain in round {
                for pair in chain.windows(2) {
                    locks.add_locks(&pair[0], &pair[1..]).await?;
                }
            }

            if let Some(next_round) = rounds.get(iteration + 1) {
                let firsts: Vec<Job> = next_round.iter().filter_map(|c| c.first().cloned()).collect();
                for chain in round {
                    if let Some(last) = chain.last() {
                        let report = locks.add_locks(last, &firsts).await?;
                        for skipped in report.skipped {
                            warn!("artifact={}: {}", artifact.id, skipped);
                        }
                    }
                }
            }
        }

        info!(
            "artifact={}: submitted '{}' as {} job(s) over {} component(s)",
            artifact.id,
            artifact.name,
            created.len(),
            artifact.components.len()
        );
        self.emit_event(CoordinatorEvent::ArtifactSubmitted {
            artifact_id: artifact.id.clone(),
            name: artifact.name.clone(),
            jobs: created.len(),
        })
        .await;

        self.schedule_unlocked(&artifact.id).await?;
        Ok(created)
    }

    async fn create_job(
        &self,
        artifact: &Artifact,
        component_id: &str,
        iteration: u32,
        stage: u32,
        lock_counter: u32,
        operation: &Operation,
    ) -> Result<Job> {
        let job_id = Uuid::new_v4().to_string();
        let path = self.payloads.store(&job_id).await?;

        let payload = JobPayload {
            job_id: job_id.clone(),
            artifact_id: artifact.id.clone(),
            component_id: component_id.to_string(),
            iteration,
            stage,
            operation: operation.clone(),
        };
        self.payloads.save(&path, &payload).await?;

        self.repo
            .create_job(
                NewJob::new(&artifact.id, component_id)
                    .with_id(job_id)
                    .with_iteration(iteration)
                    .with_stage(stage)
                    .with_path(path)
                    .with_lock_counter(lock_counter),
            )
            .await
    }

    async fn schedule_unlocked(&self, artifact_id: &str) -> Result<Vec<Job>> {
        let scheduled = self.dispatcher.schedule_unlocked(artifact_id).await?;
        for job in &scheduled {
            self.emit_event(CoordinatorEvent::JobScheduled {
                job_id: job.id.clone(),
                component_id: job.component_id.clone(),
            })
            .await;
        }
        Ok(scheduled)
    }

    /// Hand the next job to a component; `None` means poll again later
    pub async fn dispatch(&self, component_id: &str) -> Result<Option<Job>> {
        self.dispatch_in(component_id, None).await
    }

    /// Hand the component its next job of one artifact
    pub async fn dispatch_artifact(&self, component_id: &str, artifact_id: &str) -> Result<Option<Job>> {
        self.dispatch_in(component_id, Some(artifact_id)).await
    }

    async fn dispatch_in(&self, component_id: &str, artifact_id: Option<&str>) -> Result<Option<Job>> {
        let job = self.dispatcher.dispatch_in(component_id, artifact_id).await?;

        if let Some(job) = &job {
            self.emit_event(CoordinatorEvent::JobDispatched {
                job_id: job.id.clone(),
                component_id: job.component_id.clone(),
                stage: job.stage,
                iteration: job.iteration,
            })
            .await;
        }

        Ok(job)
    }

    /// Record a successful run, release its dependents and schedule them
    pub async fn complete(&self, job_id: &str, component_id: &str) -> Result<Job> {
        let _guard = self.progress.write().await;

        let job = self.owned_job(job_id, component_id).await?;
        let job = self.dispatcher.complete(&job).await?;
        self.emit_event(CoordinatorEvent::JobCompleted {
            job_id: job.id.clone(),
            component_id: job.component_id.clone(),
        })
        .await;

        let released = self.dispatcher.locks().unlock(&job).await?;
        if released > 0 {
            self.emit_event(CoordinatorEvent::JobsUnlocked {
                job_id: job.id.clone(),
                released,
            })
            .await;
        }

        self.schedule_unlocked(&job.artifact_id).await?;

        let filter = JobFilter::artifact(&job.artifact_id);
        let total = self.repo.count_jobs(&filter).await?;
        let completed = self
            .repo
            .count_jobs(&filter.with_status(JobStatus::Completed))
            .await?;
        if total == completed {
            info!("artifact={}: all {} job(s) completed", job.artifact_id, total);
            self.emit_event(CoordinatorEvent::ArtifactCompleted {
                artifact_id: job.artifact_id.clone(),
            })
            .await;
        }

        Ok(job)
    }

    /// Record a failed run; dependents stay locked
    pub async fn fail(&self, job_id: &str, component_id: &str, reason: &str) -> Result<Job> {
        let _guard = self.progress.write().await;

        let job = self.owned_job(job_id, component_id).await?;
        let job = self.dispatcher.fail(&job).await?;
        error!(
            "component={} job={} artifact={}: failed: {}",
            job.component_id, job.id, job.artifact_id, reason
        );
        self.emit_event(CoordinatorEvent::JobFailed {
            job_id: job.id.clone(),
            component_id: job.component_id.clone(),
            reason: reason.to_string(),
        })
        .await;

        Ok(job)
    }

    /// Fail RUNNING jobs that outlived their lease
    pub async fn reap(&self, lease: Duration) -> Result<Vec<Job>> {
        let _guard = self.progress.write().await;

        let reaped = self.dispatcher.reap_stalled(lease).await?;
        for job in &reaped {
            self.emit_event(CoordinatorEvent::JobFailed {
                job_id: job.id.clone(),
                component_id: job.component_id.clone(),
                reason: "lease expired".to_string(),
            })
            .await;
        }
        Ok(reaped)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.repo.get_job(job_id).await
    }

    pub async fn jobs(&self, artifact_id: &str) -> Result<Vec<Job>> {
        self.repo.list_jobs(&JobFilter::artifact(artifact_id)).await
    }

    /// Snapshot of an artifact's job counts
    pub async fn status(&self, artifact_id: &str) -> Result<ArtifactStatus> {
        let _guard = self.progress.read().await;

        let jobs = self.repo.list_jobs(&JobFilter::artifact(artifact_id)).await?;
        if jobs.is_empty() {
            return Err(Error::not_found("artifact", artifact_id));
        }

        let mut status = ArtifactStatus {
            artifact_id: artifact_id.to_string(),
            ..Default::default()
        };
        for job in &jobs {
            status.count(job.status);
        }
        Ok(status)
    }

    /// Load a job as claimed by `component_id`; ownership is checked by the transition
    async fn owned_job(&self, job_id: &str, component_id: &str) -> Result<Job> {
        let mut job = self.repo.get_job(job_id).await?;
        job.component_id = component_id.to_string();
        Ok(job)
    }
}

/// Operations one component runs per iteration, in stage order
fn round_operations(artifact: &Artifact) -> Vec<Operation> {
    let slots = OperationSlots::new(vec![artifact.data.clone()], vec![artifact.data.clone()]);

    let mut operations: Vec<Operation> = artifact
        .pipeline
        .stages()
        .iter()
        .map(|stage| Operation::for_stage(stage, slots.clone()))
        .collect();

    if let Some(plan) = &artifact.plan {
        operations.push(plan.clone());
    }

    operations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Feature, Filter, Pipeline, Value};
    use crate::persistence::{FsPayloadStore, InMemoryJobRepository};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator() -> (Coordinator, std::path::PathBuf) {
        let root = std::env::temp_dir().join(format!("lockstep-coord-{}", Uuid::new_v4()));
        let coordinator = Coordinator::new(
            Arc::new(InMemoryJobRepository::new()),
            Arc::new(FsPayloadStore::new(root.clone())),
        );
        (coordinator, root)
    }

    fn artifact(components: &[&str], iterations: u32) -> Artifact {
        let mut pipeline = Pipeline::new(vec![Feature::numeric("age")]);
        pipeline
            .append(Filter::parse("age", "NUM_GREATER_THAN", &Value::Numeric(30.0)).unwrap())
            .unwrap();
        Artifact::new(
            "adults".to_string(),
            pipeline,
            components.iter().map(|c| c.to_string()).collect(),
            iterations,
        )
    }

    #[tokio::test]
    async fn test_submit_materializes_jobs_and_schedules_sources() {
        let (coordinator, root) = coordinator();
        let artifact = artifact(&["node-a", "node-b"], 2);

        let jobs = coordinator.submit(&artifact).await.unwrap();
        assert_eq!(jobs.len(), artifact.total_jobs());
        assert_eq!(jobs.len(), 8);

        let status = coordinator.status(&artifact.id).await.unwrap();
        assert_eq!(status.scheduled, 2);
        assert_eq!(status.waiting, 6);

        // second iteration sources wait on both components
        let barrier: Vec<&Job> = jobs.iter().filter(|j| j.iteration == 1 && j.stage == 0).collect();
        assert_eq!(barrier.len(), 2);
        for job in barrier {
            assert_eq!(job.lock_counter, 2);
            assert_eq!(coordinator.locks().list_job_locks_for(job).await.unwrap().len(), 2);
        }

        // payloads were written where the jobs point
        let payload = FsPayloadStore::new(root.clone()).load(&jobs[1].path).await.unwrap();
        assert_eq!(payload.job_id, jobs[1].id);
        assert_eq!(payload.operation.kind(), "filter");

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_complete_unlocks_and_schedules_next_stage() {
        let (coordinator, root) = coordinator();
        let artifact = artifact(&["node-a"], 1);
        coordinator.submit(&artifact).await.unwrap();

        let first = coordinator.dispatch("node-a").await.unwrap().unwrap();
        assert_eq!(first.stage, 0);
        assert!(coordinator.dispatch("node-a").await.unwrap().is_none());

        coordinator.complete(&first.id, "node-a").await.unwrap();
        let second = coordinator.dispatch("node-a").await.unwrap().unwrap();
        assert_eq!(second.stage, 1);

        coordinator.complete(&second.id, "node-a").await.unwrap();
        let status = coordinator.status(&artifact.id).await.unwrap();
        assert!(status.is_complete());
        assert!(status.is_settled());

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_complete_by_other_component_conflicts() {
        let (coordinator, root) = coordinator();
        let artifact = artifact(&["node-a"], 1);
        coordinator.submit(&artifact).await.unwrap();

        let job = coordinator.dispatch("node-a").await.unwrap().unwrap();
        let err = coordinator.complete(&job.id, "node-b").await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(coordinator.get_job(&job.id).await.unwrap().status, JobStatus::Running);

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let (coordinator, root) = coordinator();
        let completed = Arc::new(AtomicUsize::new(0));
        let seen = completed.clone();
        coordinator
            .add_event_handler(move |event| {
                if let CoordinatorEvent::ArtifactCompleted { .. } = event {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        let artifact = artifact(&["node-a"], 1);
        coordinator.submit(&artifact).await.unwrap();
        while let Some(job) = coordinator.dispatch("node-a").await.unwrap() {
            coordinator.complete(&job.id, "node-a").await.unwrap();
        }

        assert_eq!(completed.load(Ordering::SeqCst), 1);
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_status_of_unknown_artifact_is_not_found() {
        let (coordinator, _) = coordinator();
        assert!(coordinator.status("nope").await.unwrap_err().is_not_found());
    }
}
