//! Workflow commands: validate, run and watch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use devflow_core::workflow::definition::{WorkflowError, load_workflow_file};
use devflow_core::workflow::engine::TriggerDispatch;
use devflow_core::workflow::scheduler::CronTriggerHandler;
use devflow_core::workflow::trigger::TriggerManager;
use devflow_infra::memory::load_workflow_dir;
use devflow_types::event::EngineEvent;
use devflow_types::execution::{
    ExecutionOptions, ExecutionResult, ExecutionStatus, StepStatus, TriggerEvent,
    ValidationReport,
};
use devflow_types::workflow::Workflow;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn validate(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let report = match load_workflow_file(file) {
        Ok(workflow) => state.engine.validate_workflow(&workflow),
        Err(WorkflowError::Invalid(errors)) => {
            let mut report = ValidationReport::new();
            for e in errors {
                report.error(e);
            }
            report
        }
        Err(e) => {
            return Err(anyhow::Error::new(e).context(format!("Failed to load {}", file.display())));
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(file, &report);
    }

    if !report.valid {
        bail!("{} has {} validation error(s)", file.display(), report.errors.len());
    }
    Ok(())
}

fn print_report(file: &Path, report: &ValidationReport) {
    println!();
    if report.valid {
        println!(
            "  {} {} is valid",
            style("✓").green().bold(),
            style(file.display()).cyan()
        );
    } else {
        println!(
            "  {} {} is invalid",
            style("✗").red().bold(),
            style(file.display()).cyan()
        );
    }
    for e in &report.errors {
        println!("    {} {e}", style("error:").red());
    }
    for w in &report.warnings {
        println!("    {} {w}", style("warning:").yellow());
    }
    println!();
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn run(
    state: &AppState,
    file: &Path,
    dry_run: bool,
    vars: &[String],
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let workflow = load_for_run(file)?;
    let workflow_id = workflow.id;
    let workflow_name = workflow.name.clone();
    state.repo.save_workflow(workflow);

    let execution_id = Uuid::now_v7();
    let options = ExecutionOptions {
        execution_id: Some(execution_id),
        trigger: Some(TriggerEvent::manual()),
        variables: parse_vars(vars)?.into_iter().collect(),
        dry_run,
        timeout_ms,
    };

    let execution = state.engine.execute_workflow(workflow_id, options);
    tokio::pin!(execution);
    let result = tokio::select! {
        result = &mut execution => result?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("  Cancelling execution {execution_id}...");
            if let Err(e) = state.engine.cancel_execution(execution_id).await {
                tracing::warn!(%execution_id, error = %e, "cancel request failed");
            }
            execution.await?
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&workflow_name, &result);
    }

    if result.status != ExecutionStatus::Success {
        bail!("execution finished with status {}", result.status);
    }
    Ok(())
}

fn load_for_run(file: &Path) -> Result<Workflow> {
    load_workflow_file(file).map_err(|e| match e {
        WorkflowError::ParseError(msg) => anyhow::anyhow!("Failed to parse workflow: {msg}"),
        WorkflowError::Invalid(errors) => {
            anyhow::anyhow!("Workflow validation failed: {}", errors.join("; "))
        }
        other => anyhow::anyhow!("Failed to load workflow: {other}"),
    })
}

/// Parse `key=value` overrides. Values are JSON when they parse as JSON,
/// otherwise plain strings.
fn parse_vars(vars: &[String]) -> Result<Vec<(String, Value)>> {
    vars.iter()
        .map(|raw| {
            let (key, value) = raw
                .split_once('=')
                .with_context(|| format!("Invalid --var '{raw}', expected KEY=VALUE"))?;
            let key = key.trim();
            if key.is_empty() {
                bail!("Invalid --var '{raw}', key is empty");
            }
            let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

fn status_cell(status: StepStatus) -> Cell {
    let color = match status {
        StepStatus::Success => Color::Green,
        StepStatus::Failure => Color::Red,
        StepStatus::Skipped => Color::Yellow,
        StepStatus::Running => Color::Blue,
    };
    Cell::new(status).fg(color)
}

fn print_result(workflow_name: &str, result: &ExecutionResult) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Duration"),
            Cell::new("Retries"),
            Cell::new("Error"),
        ]);

    for step in &result.step_results {
        table.add_row(vec![
            Cell::new(&step.step_id),
            status_cell(step.status),
            Cell::new(format!("{} ms", step.duration_ms)),
            Cell::new(step.retry_count),
            Cell::new(step.error.as_deref().unwrap_or("")),
        ]);
    }

    let headline = match result.status {
        ExecutionStatus::Success => style(result.status.to_string()).green().bold(),
        ExecutionStatus::Running => style(result.status.to_string()).blue().bold(),
        _ => style(result.status.to_string()).red().bold(),
    };

    println!();
    println!(
        "  Workflow '{}' {}{}",
        style(workflow_name).cyan(),
        headline,
        if result.dry_run { " (dry run)" } else { "" }
    );
    println!("  Execution: {}", result.execution_id);
    println!("  Duration: {} ms", result.duration_ms);
    if let Some(error) = &result.error {
        println!("  Error: {}", style(error).red());
    }
    println!();
    if result.step_results.is_empty() {
        println!("  No steps ran.");
    } else {
        println!("{table}");
    }
    println!();
}

// ---------------------------------------------------------------------------
// Watch
// ---------------------------------------------------------------------------

pub async fn watch(state: &AppState, dir: Option<PathBuf>, json: bool) -> Result<()> {
    let dir = dir
        .or_else(|| state.config.workflow_dir.clone())
        .context("No workflow directory given and `workflow_dir` is not set in the config")?;

    let loaded = load_workflow_dir(&state.repo, &dir)
        .with_context(|| format!("Failed to load workflows from {}", dir.display()))?;
    if loaded.is_empty() {
        bail!("No workflows found in {}", dir.display());
    }

    let cron = Arc::new(CronTriggerHandler::new());
    let triggers = TriggerManager::new(state.engine.trigger_sink(TriggerDispatch::Queue));
    triggers.register_handler(cron.clone()).await?;

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Workflow").fg(Color::Cyan),
            Cell::new("Steps"),
            Cell::new("Triggers"),
            Cell::new("Unbound"),
        ]);

    for workflow in state.repo.list_workflows() {
        if !workflow.enabled {
            tracing::info!(workflow = %workflow.name, "workflow disabled, triggers not activated");
            continue;
        }
        let unbound = triggers
            .activate_workflow(&workflow)
            .await
            .with_context(|| format!("Failed to activate triggers for '{}'", workflow.name))?;
        table.add_row(vec![
            Cell::new(&workflow.name),
            Cell::new(workflow.steps.len()),
            Cell::new(workflow.triggers.len()),
            Cell::new(unbound.join(", ")),
        ]);
    }

    let queue_loop = state.engine.start();
    let printer = tokio::spawn(print_events(state.engine.subscribe(), json));

    if !json {
        println!();
        println!("{table}");
        println!();
        println!(
            "  {} Watching {} ({} scheduled job(s))",
            style("⚡").bold(),
            style(dir.display()).cyan(),
            cron.job_count().await
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());
        println!();
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    triggers.shutdown().await;
    if let Err(e) = cron.shutdown().await {
        tracing::warn!(error = %e, "scheduler shutdown failed");
    }
    state.engine.shutdown();
    if let Err(e) = queue_loop.await {
        tracing::warn!(error = %e, "queue loop ended abnormally");
    }
    printer.abort();

    if !json {
        println!("\n  Stopped.");
    }
    Ok(())
}

/// Print execution outcomes as they arrive.
async fn print_events(mut rx: tokio::sync::broadcast::Receiver<EngineEvent>, json: bool) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event printer lagged");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        if json {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
            continue;
        }
        match event {
            EngineEvent::ExecutionStarted {
                execution_id,
                workflow_name,
                trigger_type,
                ..
            } => println!(
                "  {} {} started ({trigger_type}) {}",
                style("▸").cyan(),
                style(workflow_name).cyan(),
                style(execution_id).dim()
            ),
            EngineEvent::ExecutionCompleted {
                execution_id,
                duration_ms,
                ..
            } => println!(
                "  {} {} completed in {duration_ms} ms",
                style("✓").green(),
                style(execution_id).dim()
            ),
            EngineEvent::ExecutionFailed {
                execution_id,
                status,
                error,
                ..
            } => println!(
                "  {} {} {status}: {}",
                style("✗").red(),
                style(execution_id).dim(),
                error.unwrap_or_default()
            ),
            _ => {}
        }
    }
}
