//! Job lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a single job
///
/// Jobs only ever move forward along
/// `WAITING -> SCHEDULED -> RUNNING -> {COMPLETED | ERROR}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created, waiting for its dependencies
    Waiting,
    /// Unlocked and queued for its component
    Scheduled,
    /// Handed to a component and executing
    Running,
    /// Finished successfully
    Completed,
    /// Finished with a failure
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "WAITING",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Error => "ERROR",
        }
    }

    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    /// Check if `next` is the single legal forward step from this status
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Waiting, JobStatus::Scheduled)
                | (JobStatus::Scheduled, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Error)
        )
    }

    /// Which timestamp a transition into this status stamps
    pub fn stamped_time(&self) -> Option<JobTime> {
        match self {
            JobStatus::Waiting => None,
            JobStatus::Scheduled => Some(JobTime::Scheduling),
            JobStatus::Running => Some(JobTime::Execution),
            JobStatus::Completed | JobStatus::Error => Some(JobTime::Termination),
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Waiting
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(JobStatus::Waiting),
            "SCHEDULED" => Ok(JobStatus::Scheduled),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "ERROR" => Ok(JobStatus::Error),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Timestamps owned by the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTime {
    Scheduling,
    Execution,
    Termination,
}
