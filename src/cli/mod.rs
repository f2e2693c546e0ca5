//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    CompleteCommand, FailCommand, NextCommand, ReapCommand, RunCommand, StatusCommand,
    SubmitCommand, ValidateCommand,
};
use std::ffi::OsString;

/// Job coordinator for staged pipelines across worker nodes
#[derive(Debug, Parser, Clone)]
#[command(name = "lockstep")]
#[command(version = "0.1.0")]
#[command(about = "Schedules staged pipelines across worker nodes behind a dependency lock graph", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to coordinator configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Submit an artifact and materialize its jobs
    Submit(SubmitCommand),

    /// Validate an artifact configuration
    Validate(ValidateCommand),

    /// Submit an artifact and run it with in-process nodes
    Run(RunCommand),

    /// Show the job counts of an artifact
    Status(StatusCommand),

    /// Claim the next job of a component
    Next(NextCommand),

    /// Report a job as completed
    Complete(CompleteCommand),

    /// Report a job as failed
    Fail(FailCommand),

    /// Fail RUNNING jobs whose lease expired
    Reap(ReapCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
