//! CLI command definitions for the `devflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod executors;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run and supervise developer workflows.
#[derive(Parser)]
#[command(name = "devflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit log events as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Suppress all log output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine config file (defaults to ~/.devflow/devflow.toml).
    #[arg(long, global = true, env = "DEVFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow file against the registered executors.
    Validate {
        /// Path to a YAML or JSON workflow file.
        file: PathBuf,
    },

    /// Execute a workflow file once.
    Run {
        /// Path to a YAML or JSON workflow file.
        file: PathBuf,

        /// Simulate every step without calling executors.
        #[arg(long)]
        dry_run: bool,

        /// Variable override as key=value (repeatable). Values are parsed as
        /// JSON when possible.
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Execution deadline in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Load every workflow in a directory, activate its triggers and run
    /// until Ctrl+C.
    Watch {
        /// Workflow directory (defaults to `workflow_dir` from the config).
        dir: Option<PathBuf>,
    },

    /// List registered step executors and their parameter schemas.
    Executors,
}
