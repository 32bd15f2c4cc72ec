//! Cron-backed handler for `schedule` triggers.
//!
//! Provides:
//! - Standard cron parsing (5-field, or 6-field with seconds)
//! - Human-readable schedule normalization ("every 5 minutes" -> cron)
//! - A [`TriggerHandler`] that owns one `tokio-cron-scheduler` job per
//!   scheduled trigger

use std::collections::HashMap;

use chrono::Utc;
use devflow_types::execution::TriggerEvent;
use devflow_types::workflow::{TriggerKind, WorkflowTrigger};
use futures_util::future::BoxFuture;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use super::trigger::{TriggerError, TriggerHandler, TriggerSink};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Failed to create or manipulate a cron job.
    #[error("scheduler error: {0}")]
    JobError(String),

    /// Invalid cron expression or schedule string.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl From<SchedulerError> for TriggerError {
    fn from(e: SchedulerError) -> Self {
        TriggerError::SetupFailed(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Schedule parsing
// ---------------------------------------------------------------------------

/// Normalize a schedule string to a 6-field cron expression.
///
/// Supported forms (case-insensitive):
/// - 5-field cron            -> seconds field `0` prepended
/// - 6-field cron            -> unchanged
/// - "every N seconds"       -> "*/N * * * * *"
/// - "every N minutes"       -> "0 */N * * * *"
/// - "every N hours"         -> "0 0 */N * * *"
/// - "every minute"          -> "0 * * * * *"
/// - "every hour", "hourly"  -> "0 0 * * * *"
/// - "every day", "daily"    -> "0 0 0 * * *"
/// - "every day at HH:MM"    -> "0 MM HH * * *"
pub fn normalize_schedule(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();
    let invalid = || SchedulerError::InvalidSchedule(input.to_string());

    match trimmed.split_whitespace().count() {
        5 => return Ok(format!("0 {trimmed}")),
        6 => return Ok(trimmed.to_string()),
        _ => {}
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every minute" | "minutely" => return Ok("0 * * * * *".to_string()),
        "every hour" | "hourly" => return Ok("0 0 * * * *".to_string()),
        "every day" | "daily" => return Ok("0 0 0 * * *".to_string()),
        _ => {}
    }

    let Some(rest) = lower.strip_prefix("every ") else {
        return Err(SchedulerError::InvalidSchedule(format!(
            "unrecognized schedule format: '{trimmed}'"
        )));
    };

    if let Some(at) = rest.strip_prefix("day at ") {
        let (hour, minute) = at.split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
        let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
        if hour >= 24 || minute >= 60 {
            return Err(invalid());
        }
        return Ok(format!("0 {minute} {hour} * * *"));
    }

    let words: Vec<&str> = rest.split_whitespace().collect();
    let [n, unit] = words.as_slice() else {
        return Err(invalid());
    };
    let n: u32 = n.parse().map_err(|_| invalid())?;
    if n == 0 {
        return Err(SchedulerError::InvalidSchedule(
            "interval must be > 0".to_string(),
        ));
    }
    match unit.trim_end_matches('s') {
        "second" => Ok(format!("*/{n} * * * * *")),
        "minute" => Ok(format!("0 */{n} * * * *")),
        "hour" => Ok(format!("0 0 */{n} * * *")),
        _ => Err(invalid()),
    }
}

/// Normalize and parse a schedule, returning the normalized expression.
pub fn validate_schedule(input: &str) -> Result<String, SchedulerError> {
    let expr = normalize_schedule(input)?;
    expr.parse::<croner::Cron>()
        .map_err(|e| SchedulerError::InvalidSchedule(format!("'{input}': {e}")))?;
    Ok(expr)
}

// ---------------------------------------------------------------------------
// CronTriggerHandler
// ---------------------------------------------------------------------------

/// Handler for `schedule` triggers backed by `tokio_cron_scheduler`.
///
/// The underlying scheduler starts on the first `setup` and stops on
/// [`shutdown`](Self::shutdown).
pub struct CronTriggerHandler {
    scheduler: Mutex<Option<JobScheduler>>,
    /// (workflow_id, trigger_id) -> job ID.
    jobs: RwLock<HashMap<(Uuid, String), Uuid>>,
}

impl CronTriggerHandler {
    pub fn new() -> Self {
        Self {
            scheduler: Mutex::new(None),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of scheduled triggers.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Stop the scheduler and drop every job.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
            tracing::info!("cron scheduler stopped");
        }
        self.jobs.write().await.clear();
        Ok(())
    }

    async fn add_job(
        &self,
        trigger: &WorkflowTrigger,
        workflow_id: Uuid,
        sink: TriggerSink,
    ) -> Result<(), SchedulerError> {
        let TriggerKind::Schedule { cron } = &trigger.kind else {
            return Err(SchedulerError::InvalidSchedule(format!(
                "trigger '{}' is not a schedule trigger",
                trigger.id
            )));
        };
        let cron_expr = validate_schedule(cron)?;

        let trigger_id = trigger.id.clone();
        let source = cron.clone();
        let job = Job::new_async(cron_expr.as_str(), move |_job_id, _lock| {
            let sink = sink.clone();
            let event = TriggerEvent::new(
                "schedule",
                source.clone(),
                Some(json!({ "scheduled_at": Utc::now().to_rfc3339() })),
            )
            .with_trigger_id(trigger_id.clone());
            Box::pin(async move {
                tracing::debug!(%workflow_id, "cron trigger fired");
                sink(workflow_id, event).await;
            })
        })
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;
        let job_id = job.guid();

        let mut guard = self.scheduler.lock().await;
        if guard.is_none() {
            let scheduler = JobScheduler::new()
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
            scheduler
                .start()
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
            tracing::info!("cron scheduler started");
            *guard = Some(scheduler);
        }
        let Some(scheduler) = guard.as_ref() else {
            return Err(SchedulerError::JobError("scheduler not running".to_string()));
        };
        scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        drop(guard);

        self.jobs
            .write()
            .await
            .insert((workflow_id, trigger.id.clone()), job_id);
        tracing::info!(%workflow_id, trigger_id = %trigger.id, cron = %cron_expr, %job_id, "schedule trigger added");
        Ok(())
    }

    async fn remove_job(&self, workflow_id: Uuid, trigger_id: &str) -> Result<(), SchedulerError> {
        let Some(job_id) = self
            .jobs
            .write()
            .await
            .remove(&(workflow_id, trigger_id.to_string()))
        else {
            return Ok(());
        };
        if let Some(scheduler) = self.scheduler.lock().await.as_ref() {
            scheduler
                .remove(&job_id)
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        }
        tracing::info!(%workflow_id, trigger_id, "schedule trigger removed");
        Ok(())
    }
}

impl Default for CronTriggerHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerHandler for CronTriggerHandler {
    fn kind(&self) -> &'static str {
        "schedule"
    }

    fn setup<'a>(
        &'a self,
        trigger: &'a WorkflowTrigger,
        workflow_id: Uuid,
        sink: TriggerSink,
    ) -> BoxFuture<'a, Result<(), TriggerError>> {
        Box::pin(async move { Ok(self.add_job(trigger, workflow_id, sink).await?) })
    }

    fn teardown<'a>(
        &'a self,
        workflow_id: Uuid,
        trigger_id: &'a str,
    ) -> BoxFuture<'a, Result<(), TriggerError>> {
        Box::pin(async move {
            self.remove_job(workflow_id, trigger_id)
                .await
                .map_err(|e| TriggerError::TeardownFailed(e.to_string()))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
