//! Execution-time types: trigger events, results, queue entries and status
//! reports.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Trigger events
// ---------------------------------------------------------------------------

/// The event that started an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// ID of the `WorkflowTrigger` that fired, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    /// e.g. "manual", "schedule", "file_change", "error", "webhook".
    pub trigger_type: String,
    /// Free-form origin (cron expression, path, HTTP route).
    pub source: String,
    pub fired_at: DateTime<Utc>,
    /// Event body exposed to templates as `trigger.<path>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl TriggerEvent {
    pub fn new(
        trigger_type: impl Into<String>,
        source: impl Into<String>,
        payload: Option<Value>,
    ) -> Self {
        Self {
            trigger_id: None,
            trigger_type: trigger_type.into(),
            source: source.into(),
            fired_at: Utc::now(),
            payload,
        }
    }

    /// A manual trigger with no payload.
    pub fn manual() -> Self {
        Self::new("manual", "manual", None)
    }

    /// Attach the originating trigger ID.
    pub fn with_trigger_id(mut self, trigger_id: impl Into<String>) -> Self {
        self.trigger_id = Some(trigger_id.into());
        self
    }
}

impl Default for TriggerEvent {
    fn default() -> Self {
        Self::manual()
    }
}

/// Caller-supplied part of an execution context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Use this ID instead of generating one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerEvent>,
    /// Overrides for declared variable defaults.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, Value>,
    /// Simulate every step without calling executors.
    #[serde(default)]
    pub dry_run: bool,
    /// Overrides the workflow's execution deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ExecutionOptions {
    pub fn with_trigger(mut self, trigger: TriggerEvent) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Step results
// ---------------------------------------------------------------------------

/// Status of a single step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    Skipped,
    Running,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Success => "success",
            StepStatus::Failure => "failure",
            StepStatus::Skipped => "skipped",
            StepStatus::Running => "running",
        };
        f.write_str(s)
    }
}

/// Outcome of one step. Finalized results are never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionResult {
    pub step_id: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attempts beyond the first.
    #[serde(default)]
    pub retry_count: u32,
}

impl StepExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// What an executor reports for one attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution results
// ---------------------------------------------------------------------------

/// Status of a whole execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Cancelled,
    Timeout,
    Running,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Running => "running",
        };
        f.write_str(s)
    }
}

/// Terminal value of an execution, returned to the caller and handed to the
/// persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// In execution order.
    pub step_results: Vec<StepExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl ExecutionResult {
    /// Result for a given step, if it ran.
    pub fn step(&self, step_id: &str) -> Option<&StepExecutionResult> {
        self.step_results.iter().find(|r| r.step_id == step_id)
    }

    /// Step IDs in execution order.
    pub fn executed_steps(&self) -> Vec<&str> {
        self.step_results.iter().map(|r| r.step_id.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Result of validating a workflow or a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.valid = false;
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Fold another report in, prefixing each message.
    pub fn merge(&mut self, prefix: &str, other: ValidationReport) {
        for e in other.errors {
            self.error(format!("{prefix}{e}"));
        }
        for w in other.warnings {
            self.warning(format!("{prefix}{w}"));
        }
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Queue entries
// ---------------------------------------------------------------------------

/// An execution request waiting for a concurrency slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedExecution {
    /// Becomes the execution ID once promoted.
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Higher runs first.
    #[serde(default)]
    pub priority: i32,
    /// Not promoted before this instant.
    pub scheduled_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    pub trigger: TriggerEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ExecutionOptions>,
}

impl QueuedExecution {
    /// A request due immediately with priority 0.
    pub fn new(workflow_id: Uuid, trigger: TriggerEvent) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            priority: 0,
            scheduled_at: now,
            enqueued_at: now,
            trigger,
            context: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = at;
        self
    }

    pub fn with_context(mut self, options: ExecutionOptions) -> Self {
        self.context = Some(options);
        self
    }

    /// Options handed to the engine when this entry is promoted.
    pub fn execution_options(&self) -> ExecutionOptions {
        let mut options = self.context.clone().unwrap_or_default();
        options.execution_id = Some(self.id);
        options.trigger = Some(self.trigger.clone());
        options
    }
}

/// A queue entry that has left the running list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedExecution {
    pub entry: QueuedExecution,
    pub status: ExecutionStatus,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sizes of the four queue lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Status reports
// ---------------------------------------------------------------------------

/// Point-in-time view of an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatusReport {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub state: ExecutionState,
}

/// Where an execution currently is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionState {
    /// Waiting in the queue; position 0 is next.
    Queued { position: usize },
    /// Promoted by the queue, not yet registered as running.
    Starting { cancel_requested: bool },
    Running {
        started_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_step: Option<String>,
        completed_steps: Vec<String>,
        cancel_requested: bool,
    },
    Finished {
        status: ExecutionStatus,
        finished_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validation_report_merge_marks_invalid() {
        let mut report = ValidationReport::new();
        report.warning("workflow has no triggers");
        assert!(report.valid);

        let mut step = ValidationReport::new();
        step.error("missing parameter 'command'");
        step.warning("parameter 'cwd' is ignored");
        report.merge("step 'build': ", step);

        assert!(!report.valid);
        assert_eq!(report.errors, vec!["step 'build': missing parameter 'command'"]);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_queued_execution_options_carry_id_and_trigger() {
        let trigger = TriggerEvent::new("webhook", "/hooks/ci", Some(json!({"ref": "main"})));
        let entry = QueuedExecution::new(Uuid::now_v7(), trigger)
            .with_priority(3)
            .with_context(ExecutionOptions::default().with_variable("env", "ci").dry_run());

        let options = entry.execution_options();
        assert_eq!(options.execution_id, Some(entry.id));
        assert_eq!(options.trigger.unwrap().trigger_type, "webhook");
        assert_eq!(options.variables["env"], json!("ci"));
        assert!(options.dry_run);
    }

    #[test]
    fn test_execution_state_serializes_with_tag() {
        let state = ExecutionState::Queued { position: 2 };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value, json!({ "state": "queued", "position": 2 }));

        let state = ExecutionState::Starting { cancel_requested: false };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value, json!({ "state": "starting", "cancel_requested": false }));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ExecutionStatus::Timeout.to_string(), "timeout");
        assert_eq!(StepStatus::Skipped.to_string(), "skipped");
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }
}
