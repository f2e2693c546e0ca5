use anyhow::{Context, Result};
use lockstep::cli::commands::{
    CompleteCommand, FailCommand, NextCommand, ReapCommand, RunCommand, StatusCommand,
    SubmitCommand, ValidateCommand,
};
use lockstep::cli::output::*;
use lockstep::cli::{Cli, Command};
use lockstep::core::config::{ArtifactConfig, CoordinatorConfig};
use lockstep::core::{Dataset, EnvValue, Row};
use lockstep::execution::{Coordinator, CoordinatorEvent, JobExecutor, LocalWorkspace, NodeRunner};
use lockstep::persistence::{FsPayloadStore, InMemoryJobRepository, JobRepository, PayloadStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = CoordinatorConfig::load(cli.config.as_deref())
        .context("Failed to load coordinator config")?;

    // Execute command
    match &cli.command {
        Command::Submit(cmd) => submit_artifact(cmd, &config).await?,
        Command::Validate(cmd) => validate_artifact(cmd)?,
        Command::Run(cmd) => run_artifact(cmd, &config).await?,
        Command::Status(cmd) => show_status(cmd, &config).await?,
        Command::Next(cmd) => next_job(cmd, &config).await?,
        Command::Complete(cmd) => complete_job(cmd, &config).await?,
        Command::Fail(cmd) => fail_job(cmd, &config).await?,
        Command::Reap(cmd) => reap_jobs(cmd, &config).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_database(config: &CoordinatorConfig) -> Result<Arc<dyn JobRepository>> {
    let repo = lockstep::persistence::SqliteJobRepository::at_path(&config.database)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.display()))?;
    Ok(Arc::new(repo))
}

#[cfg(not(feature = "sqlite"))]
async fn open_database(_config: &CoordinatorConfig) -> Result<Arc<dyn JobRepository>> {
    anyhow::bail!("Built without sqlite support; only `run --in-memory` is available")
}

async fn open_coordinator(config: &CoordinatorConfig, in_memory: bool) -> Result<Arc<Coordinator>> {
    let repo: Arc<dyn JobRepository> = if in_memory {
        Arc::new(InMemoryJobRepository::new())
    } else {
        open_database(config).await?
    };
    let payloads: Arc<dyn PayloadStore> = Arc::new(FsPayloadStore::new(config.storage_root.clone()));
    Ok(Arc::new(Coordinator::new(repo, payloads)))
}

async fn submit_artifact(cmd: &SubmitCommand, config: &CoordinatorConfig) -> Result<()> {
    let artifact = ArtifactConfig::from_file(&cmd.file)
        .context("Failed to load artifact config")?
        .compile()?;

    let coordinator = open_coordinator(config, false).await?;
    let jobs = coordinator.submit(&artifact).await?;

    println!(
        "{} Submitted {} as {} jobs",
        CHECK,
        style(&artifact.name).bold(),
        style(jobs.len()).cyan()
    );
    println!("  Artifact: {}", style(&artifact.id).cyan());
    Ok(())
}

fn validate_artifact(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating artifact...", INFO);

    match ArtifactConfig::from_file(&cmd.file) {
        Ok(config) => {
            let pipeline = config.pipeline()?;
            println!("{} Artifact configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Components: {}", style(config.components.join(", ")).cyan());
            println!("  Iterations: {}", style(config.iterations).cyan());
            println!("  Stages: {}", style(pipeline.len()).cyan());
            if let Some(plan) = config.plan()? {
                println!("  Plan: {}", style(plan.kind()).cyan());
            }

            if cmd.json {
                println!("\n{}", pipeline.to_json()?);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

fn load_rows(path: &str) -> Result<Dataset> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read data file {}", path))?;
    let rows: Vec<Row> = serde_json::from_str(&content)
        .with_context(|| format!("Data file {} is not a JSON array of rows", path))?;
    Ok(Dataset::from_rows(rows))
}

async fn run_artifact(cmd: &RunCommand, config: &CoordinatorConfig) -> Result<()> {
    let artifact = ArtifactConfig::from_file(&cmd.file)
        .context("Failed to load artifact config")?
        .compile()?;

    let data: HashMap<&str, &str> = cmd
        .data
        .iter()
        .map(|(component, path)| (component.as_str(), path.as_str()))
        .collect();

    let mut workspaces = Vec::new();
    for component in &artifact.components {
        let path = data
            .get(component.as_str())
            .with_context(|| format!("No data for component '{}' (use --data {}=path.json)", component, component))?;
        let workspace = LocalWorkspace::new().with_dataset(artifact.data.clone(), load_rows(path)?);
        workspaces.push((component.clone(), Arc::new(workspace)));
    }

    let coordinator = open_coordinator(config, cmd.in_memory).await?;

    let progress = create_progress_bar(artifact.total_jobs());
    let bar = progress.clone();
    coordinator
        .add_event_handler(move |event| {
            if matches!(
                event,
                CoordinatorEvent::JobCompleted { .. } | CoordinatorEvent::JobFailed { .. }
            ) {
                bar.inc(1);
            }
            if !matches!(event, CoordinatorEvent::JobScheduled { .. }) {
                bar.println(format_event(&event));
            }
        })
        .await;

    coordinator.submit(&artifact).await?;

    let payloads: Arc<dyn PayloadStore> = Arc::new(FsPayloadStore::new(config.storage_root.clone()));
    let mut nodes = Vec::new();
    for (component, workspace) in &workspaces {
        let executor = Arc::new(JobExecutor::new(payloads.clone(), workspace.clone()));
        let node = NodeRunner::new(
            component.clone(),
            coordinator.clone(),
            executor,
            config.max_workers,
            config.poll_interval(),
        );
        let artifact_id = artifact.id.clone();
        nodes.push(tokio::spawn(async move { node.run(&artifact_id).await }));
    }

    for node in nodes {
        node.await.context("Node task panicked")??;
    }
    progress.finish_and_clear();

    let status = coordinator.status(&artifact.id).await?;
    println!("\n{}", format_artifact_status(&status));

    for (component, workspace) in &workspaces {
        let Some(env) = workspace.snapshot(&artifact.id).await else {
            continue;
        };
        println!("  {}", style(component).bold());
        for name in env.names() {
            let summary = match env.get(name) {
                Some(EnvValue::Dataset(d)) => format!("dataset, {} rows", d.len()),
                Some(EnvValue::Model(m)) => format!(
                    "model on '{}', {} samples, slope {:.4}, intercept {:.4}",
                    m.label, m.samples, m.slope, m.intercept
                ),
                Some(EnvValue::Scalar(v)) => serde_json::to_string(v)?,
                None => continue,
            };
            println!("    {} = {}", style(name).cyan(), summary);
        }
    }

    if status.is_complete() {
        println!(
            "\n{} {} completed {}",
            CHECK,
            style(&artifact.name).bold(),
            style("successfully").green()
        );
    } else {
        println!("\n{} {} {}", CROSS, style(&artifact.name).bold(), style("failed").red());
        error!("artifact={}: {} job(s) failed", artifact.id, status.error);
        std::process::exit(1);
    }

    Ok(())
}

async fn show_status(cmd: &StatusCommand, config: &CoordinatorConfig) -> Result<()> {
    let coordinator = open_coordinator(config, false).await?;
    let status = coordinator.status(&cmd.artifact_id).await?;
    let jobs = if cmd.jobs {
        coordinator.jobs(&cmd.artifact_id).await?
    } else {
        Vec::new()
    };

    if cmd.json {
        let data = serde_json::json!({ "status": status, "jobs": jobs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{}", format_artifact_status(&status));
    for job in &jobs {
        println!("  {}", format_job(job));
    }
    Ok(())
}

async fn next_job(cmd: &NextCommand, config: &CoordinatorConfig) -> Result<()> {
    let coordinator = open_coordinator(config, false).await?;

    match coordinator.dispatch(&cmd.component).await? {
        Some(job) => {
            println!("{}", format_job(&job));
            println!("  Job: {}", style(&job.id).cyan());
            println!("  Payload: {}", style(&job.path).dim());
        }
        None => println!("{} Nothing to do for {}", INFO, style(&cmd.component).cyan()),
    }
    Ok(())
}

async fn complete_job(cmd: &CompleteCommand, config: &CoordinatorConfig) -> Result<()> {
    let coordinator = open_coordinator(config, false).await?;
    let job = coordinator.complete(&cmd.job_id, &cmd.component).await?;
    println!("{} {}", CHECK, format_job(&job));
    Ok(())
}

async fn fail_job(cmd: &FailCommand, config: &CoordinatorConfig) -> Result<()> {
    let coordinator = open_coordinator(config, false).await?;
    let job = coordinator.fail(&cmd.job_id, &cmd.component, &cmd.reason).await?;
    println!("{} {}", CROSS, format_job(&job));
    Ok(())
}

async fn reap_jobs(cmd: &ReapCommand, config: &CoordinatorConfig) -> Result<()> {
    let lease = match cmd.lease_secs {
        Some(secs) => chrono::Duration::try_seconds(secs as i64),
        None => config.lease(),
    }
    .context("No lease configured (set lease_secs or pass --lease-secs)")?;

    let coordinator = open_coordinator(config, false).await?;
    let reaped = coordinator.reap(lease).await?;

    if reaped.is_empty() {
        println!("{} No stalled jobs", INFO);
    } else {
        println!("{} Failed {} stalled job(s)", WARN, style(reaped.len()).yellow());
        for job in &reaped {
            println!("  {}", format_job(job));
        }
    }
    Ok(())
}
