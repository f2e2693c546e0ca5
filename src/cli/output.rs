//! CLI output formatting

use crate::{
    core::{Job, JobStatus},
    execution::{ArtifactStatus, CoordinatorEvent},
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static LOCK: Emoji<'_, '_> = Emoji("🔓 ", "+ ");

/// Create a progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let bar_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(bar_style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a job status for display
pub fn format_status(status: JobStatus) -> String {
    match status {
        JobStatus::Waiting => style("WAITING").dim().to_string(),
        JobStatus::Scheduled => style("SCHEDULED").blue().to_string(),
        JobStatus::Running => style("RUNNING").yellow().to_string(),
        JobStatus::Completed => style("COMPLETED").green().to_string(),
        JobStatus::Error => style("ERROR").red().to_string(),
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// One line per job
pub fn format_job(job: &Job) -> String {
    format!(
        "{} {} it={} stage={} locks={} {}",
        style(short(&job.id)).dim(),
        style(&job.component_id).cyan(),
        job.iteration,
        job.stage,
        job.lock_counter,
        format_status(job.status)
    )
}

/// Format an artifact's counts for display
pub fn format_artifact_status(status: &ArtifactStatus) -> String {
    let icon = if status.has_failed() {
        CROSS
    } else if status.is_complete() {
        CHECK
    } else {
        SPINNER
    };

    format!(
        "{} {} - {}/{} completed ({}) - {} waiting, {} scheduled, {} running, {} error",
        icon,
        style(short(&status.artifact_id)).dim(),
        status.completed,
        status.total,
        style(format!("{:.0}%", status.progress() * 100.0)).cyan(),
        status.waiting,
        status.scheduled,
        status.running,
        style(status.error).red()
    )
}

/// Format a coordinator event for display
pub fn format_event(event: &CoordinatorEvent) -> String {
    match event {
        CoordinatorEvent::ArtifactSubmitted {
            artifact_id,
            name,
            jobs,
        } => format!(
            "{} Submitted {} ({}) as {} jobs",
            ROCKET,
            style(name).bold(),
            style(short(artifact_id)).dim(),
            style(jobs).cyan()
        ),
        CoordinatorEvent::JobScheduled {
            job_id,
            component_id,
        } => format!(
            "{} {} scheduled on {}",
            INFO,
            style(short(job_id)).dim(),
            style(component_id).cyan()
        ),
        CoordinatorEvent::JobDispatched {
            job_id,
            component_id,
            stage,
            iteration,
        } => format!(
            "{} {} {} (iteration {}, stage {})",
            SPINNER,
            style(component_id).cyan(),
            style(short(job_id)).dim(),
            iteration,
            stage
        ),
        CoordinatorEvent::JobCompleted {
            job_id,
            component_id,
        } => format!(
            "{} {} {}",
            CHECK,
            style(component_id).green(),
            style(short(job_id)).dim()
        ),
        CoordinatorEvent::JobFailed {
            job_id,
            component_id,
            reason,
        } => format!(
            "{} {} {}: {}",
            CROSS,
            style(component_id).red(),
            style(short(job_id)).dim(),
            style(reason).dim()
        ),
        CoordinatorEvent::JobsUnlocked { job_id, released } => format!(
            "{} {} released {} dependent(s)",
            LOCK,
            style(short(job_id)).dim(),
            released
        ),
        CoordinatorEvent::ArtifactCompleted { artifact_id } => format!(
            "{} Artifact {} {}",
            CHECK,
            style(short(artifact_id)).dim(),
            style("completed").green()
        ),
    }
}
