//! devflow CLI entry point.
//!
//! Binary name: `devflow`
//!
//! Parses CLI arguments, initializes tracing and the engine, then dispatches
//! to the command handler.

mod cli;
mod state;

use clap::Parser;
use devflow_infra::config::{default_config_path, load_engine_config};
use devflow_observe::tracing_setup::{
    TracingOptions, init_tracing, shutdown_tracing, verbosity_filter,
};
use devflow_types::config::EngineConfig;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let tracing_options = TracingOptions {
        default_filter: verbosity_filter(cli.verbose, cli.quiet).to_string(),
        json: cli.json_logs,
        enable_otel: cli.otel,
    };
    if let Err(e) = init_tracing(&tracing_options) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let config = match cli.config.clone().or_else(default_config_path) {
        Some(path) => load_engine_config(&path).await,
        None => EngineConfig::default(),
    };
    let state = AppState::init(config)?;

    let outcome = match cli.command {
        Commands::Validate { file } => cli::workflow::validate(&state, &file, cli.json),
        Commands::Run {
            file,
            dry_run,
            vars,
            timeout_ms,
        } => cli::workflow::run(&state, &file, dry_run, &vars, timeout_ms, cli.json).await,
        Commands::Watch { dir } => cli::workflow::watch(&state, dir, cli.json).await,
        Commands::Executors => cli::executors::list(&state, cli.json),
    };

    shutdown_tracing();
    outcome
}
