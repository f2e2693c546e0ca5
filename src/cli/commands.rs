//! CLI command definitions

use clap::Args;

/// Submit an artifact
#[derive(Debug, Args, Clone)]
pub struct SubmitCommand {
    /// Path to artifact YAML file
    #[arg(short, long)]
    pub file: String,
}

/// Validate an artifact configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to artifact YAML file
    #[arg(short, long)]
    pub file: String,

    /// Print the compiled pipeline as JSON
    #[arg(long)]
    pub json: bool,
}

/// Submit and run an artifact locally
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to artifact YAML file
    #[arg(short, long)]
    pub file: String,

    /// Local data of a component (component=path.json)
    #[arg(long, value_parser = parse_key_value)]
    pub data: Vec<(String, String)>,

    /// Keep jobs in memory instead of the database
    #[arg(long)]
    pub in_memory: bool,
}

/// Show artifact status
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Artifact ID
    pub artifact_id: String,

    /// List every job
    #[arg(long)]
    pub jobs: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Claim the next job of a component
#[derive(Debug, Args, Clone)]
pub struct NextCommand {
    /// Component ID
    #[arg(long)]
    pub component: String,
}

/// Report a completed job
#[derive(Debug, Args, Clone)]
pub struct CompleteCommand {
    /// Job ID
    pub job_id: String,

    /// Component that ran the job
    #[arg(long)]
    pub component: String,
}

/// Report a failed job
#[derive(Debug, Args, Clone)]
pub struct FailCommand {
    /// Job ID
    pub job_id: String,

    /// Component that ran the job
    #[arg(long)]
    pub component: String,

    /// Failure reason
    #[arg(long, default_value = "reported by node")]
    pub reason: String,
}

/// Fail stalled jobs
#[derive(Debug, Args, Clone)]
pub struct ReapCommand {
    /// Lease in seconds (overrides the configured lease)
    #[arg(long)]
    pub lease_secs: Option<u64>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
