//! Job, lock edge and artifact models

use crate::core::{
    operation::Operation,
    pipeline::Pipeline,
    state::{JobStatus, JobTime},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A submitted computation, compiled and ready to be split into jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique artifact ID
    pub id: String,

    /// Human-readable name from the submitted configuration
    pub name: String,

    /// Compiled query pipeline
    pub pipeline: Pipeline,

    /// Final step run after the last stage (training or estimation)
    pub plan: Option<Operation>,

    /// Components (nodes) taking part in the computation
    pub components: Vec<String>,

    /// Number of rounds to run
    pub iterations: u32,
    /// Environment slot holding each component's local dataset
    #[serde(default = "default_data_name")]
    pub data: String,
}

fn default_data_name() -> String {
    "data".to_string()
}

impl Artifact {
    pub fn new(name: String, pipeline: Pipeline, components: Vec<String>, iterations: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            pipeline,
            plan: None,
            components,
            iterations,
            data: default_data_name(),
        }
    }

    pub fn with_data(mut self, data: &str) -> Self {
        self.data = data.to_string();
        self
    }

    pub fn with_plan(mut self, plan: Operation) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Number of jobs one component runs per iteration
    pub fn jobs_per_round(&self) -> usize {
        self.pipeline.len() + usize::from(self.plan.is_some())
    }

    /// Total number of jobs the artifact materializes into
    pub fn total_jobs(&self) -> usize {
        self.jobs_per_round() * self.components.len() * self.iterations as usize
    }
}

/// One schedulable unit of work bound to a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub artifact_id: String,
    pub component_id: String,
    pub status: JobStatus,
    pub iteration: u32,

    /// Position of the executed step in the artifact round
    pub stage: u32,

    /// Location of the serialized payload
    pub path: String,

    /// Number of dependency edges the job was created with
    pub lock_counter: u32,

    pub creation_time: DateTime<Utc>,
    pub scheduling_time: Option<DateTime<Utc>>,
    pub execution_time: Option<DateTime<Utc>>,
    pub termination_time: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a job record from its creation request
    pub fn from_new(new: NewJob, creation_time: DateTime<Utc>) -> Self {
        Job {
            id: new.id,
            artifact_id: new.artifact_id,
            component_id: new.component_id,
            status: new.status,
            iteration: new.iteration,
            stage: new.stage,
            path: new.path,
            lock_counter: new.lock_counter,
            creation_time,
            scheduling_time: None,
            execution_time: None,
            termination_time: None,
        }
    }

    /// Set the status and stamp the matching timestamp
    pub fn stamp(&mut self, status: JobStatus, now: DateTime<Utc>) {
        self.status = status;
        match status.stamped_time() {
            Some(JobTime::Scheduling) => self.scheduling_time = Some(now),
            Some(JobTime::Execution) => self.execution_time = Some(now),
            Some(JobTime::Termination) => self.termination_time = Some(now),
            None => {}
        }
    }
}

/// Request to create a job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub artifact_id: String,
    pub component_id: String,
    pub status: JobStatus,
    pub iteration: u32,
    pub stage: u32,
    pub path: String,
    pub lock_counter: u32,
}

impl NewJob {
    pub fn new(artifact_id: &str, component_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            artifact_id: artifact_id.to_string(),
            component_id: component_id.to_string(),
            status: JobStatus::Waiting,
            iteration: 0,
            stage: 0,
            path: String::new(),
            lock_counter: 0,
        }
    }

    pub fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }

    pub fn with_stage(mut self, stage: u32) -> Self {
        self.stage = stage;
        self
    }

    pub fn with_path(mut self, path: String) -> Self {
        self.path = path;
        self
    }

    pub fn with_lock_counter(mut self, lock_counter: u32) -> Self {
        self.lock_counter = lock_counter;
        self
    }
}

/// Dependency edge: `next_id` may not run while `locked` is true
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLock {
    pub id: i64,
    pub artifact_id: String,
    pub job_id: String,
    pub next_id: String,
    pub locked: bool,
}

/// Query shape for listing and counting jobs
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub artifact_id: Option<String>,
    pub component_id: Option<String>,
    pub status: Option<JobStatus>,
    pub iteration: Option<u32>,
}

impl JobFilter {
    pub fn artifact(artifact_id: &str) -> Self {
        Self {
            artifact_id: Some(artifact_id.to_string()),
            ..Default::default()
        }
    }

    pub fn component(component_id: &str) -> Self {
        Self {
            component_id: Some(component_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.artifact_id.as_ref().map_or(true, |a| *a == job.artifact_id)
            && self.component_id.as_ref().map_or(true, |c| *c == job.component_id)
            && self.status.map_or(true, |s| s == job.status)
            && self.iteration.map_or(true, |i| i == job.iteration)
    }
}
