//! Workflow definition types.
//!
//! A `Workflow` is a declarative graph: each `WorkflowStep` names an action
//! type, lists the upstream steps it waits on (`connections.inputs`) and the
//! downstream steps it may enqueue (`connections.outputs`, each optionally
//! guarded by a `ConnectionCondition`). Workflows are owned by the persistence
//! layer; the engine only ever reads a snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::expression::Expression;

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A named, versioned graph of steps plus its triggers and variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Stable identifier (UUIDv7 when generated by devflow).
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Semantic version string.
    #[serde(default = "default_version")]
    pub version: String,
    /// Disabled workflows are rejected by the engine.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Steps in declaration order. Order only matters for seeding roots.
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub triggers: Vec<WorkflowTrigger>,
    #[serde(default)]
    pub variables: Vec<WorkflowVariable>,
    #[serde(default)]
    pub settings: WorkflowSettings,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_true() -> bool {
    true
}

impl Workflow {
    /// Look up a step by ID.
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Steps with no inputs, in declaration order.
    pub fn root_steps(&self) -> impl Iterator<Item = &WorkflowStep> {
        self.steps.iter().filter(|s| s.is_root())
    }
}

/// Workflow-wide execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Global execution deadline in milliseconds (checked after each step).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Retries for steps using the `retry` strategy without an explicit policy.
    #[serde(default)]
    pub max_retries: u32,
    /// Maximum simultaneous executions of this workflow (None = unlimited).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Per-workflow logging verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// A typed workflow variable with an optional default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Declared type of a workflow variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl VariableType {
    /// Whether `value` conforms to this type. `null` never does.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            VariableType::String => value.is_string(),
            VariableType::Number => value.is_number(),
            VariableType::Boolean => value.is_boolean(),
            VariableType::Object => value.is_object(),
            VariableType::Array => value.is_array(),
        }
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One unit of work in a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique within the workflow.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub action: StepAction,
    #[serde(default)]
    pub connections: StepConnections,
    /// Per-attempt timeout in milliseconds (engine default when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
}

impl WorkflowStep {
    /// A root step has no inputs.
    pub fn is_root(&self) -> bool {
        self.connections.inputs.is_empty()
    }

    /// Display name, falling back to the ID.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Error strategy, defaulting to `fail`.
    pub fn error_strategy(&self) -> ErrorStrategy {
        self.error_handling
            .as_ref()
            .map(|h| h.strategy)
            .unwrap_or_default()
    }
}

/// The action a step performs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAction {
    /// Executor key, e.g. `"ai_call"`, `"shell"`, `"echo"`.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Optional provider hint for the executor (e.g. an LLM vendor).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Free-form parameters; strings may contain `{{ ... }}` placeholders.
    #[serde(default = "empty_object")]
    pub parameters: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Upstream dependencies and downstream edges of a step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepConnections {
    /// Step IDs that must have a result before this step runs.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Edges evaluated after this step finishes.
    #[serde(default)]
    pub outputs: Vec<StepConnection>,
}

/// A directed edge to a downstream step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConnection {
    pub target_step_id: String,
    /// Absent means the edge is always taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConnectionCondition>,
}

/// Guard on a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionCondition {
    /// Take the edge when the upstream step succeeded.
    Success,
    /// Take the edge when the upstream step did not succeed.
    Failure,
    /// Take the edge when the expression evaluates to `true`.
    Expression { expression: Expression },
}

// ---------------------------------------------------------------------------
// Retry / error handling
// ---------------------------------------------------------------------------

/// Retry policy for a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (default 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffType,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Add up to 10% random extra delay.
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffType::default(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: false,
        }
    }
}

/// Delay growth between retry attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

/// Error handling configuration for a step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandling {
    #[serde(default)]
    pub strategy: ErrorStrategy,
}

/// What happens after a step exhausts its attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Abort the execution.
    #[default]
    Fail,
    /// Keep the failure and continue with downstream edges.
    Continue,
    /// Retry inside the attempt loop, then abort.
    Retry,
    /// Record the step as skipped and continue.
    Skip,
}

impl ErrorStrategy {
    /// Whether a final failure under this strategy aborts the execution.
    pub fn aborts(&self) -> bool {
        matches!(self, ErrorStrategy::Fail | ErrorStrategy::Retry)
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// An external event source bound to a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: TriggerKind,
}

/// Trigger source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    /// Fired explicitly (CLI, HTTP route).
    Manual,
    /// Cron expression or human-readable schedule.
    Schedule { cron: String },
    /// Filesystem change under the given paths.
    FileChange {
        paths: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        patterns: Vec<String>,
    },
    /// Error escalated by a watched coding-assistant process.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    /// Incoming webhook.
    Webhook { path: String },
}

impl TriggerKind {
    /// The `type` tag, used to pick a trigger handler.
    pub fn name(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Schedule { .. } => "schedule",
            TriggerKind::FileChange { .. } => "file_change",
            TriggerKind::Error { .. } => "error",
            TriggerKind::Webhook { .. } => "webhook",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_workflow_defaults() {
        let wf: Workflow = serde_json::from_value(json!({
            "id": "01938e90-0000-7000-8000-000000000001",
            "name": "lint-on-save",
            "steps": [
                { "id": "lint", "action": { "type": "shell" } }
            ]
        }))
        .unwrap();

        assert!(wf.enabled);
        assert_eq!(wf.version, "1.0.0");
        assert_eq!(wf.settings.log_level, LogLevel::Info);
        assert_eq!(wf.settings.max_retries, 0);
        let step = &wf.steps[0];
        assert!(step.is_root());
        assert_eq!(step.display_name(), "lint");
        assert_eq!(step.error_strategy(), ErrorStrategy::Fail);
        assert!(step.action.parameters.is_object());
    }

    #[test]
    fn test_yaml_workflow_with_connections_and_triggers() {
        let yaml = r#"
id: "01938e90-0000-7000-8000-000000000002"
name: escalate-errors
triggers:
  - id: on-error
    type: error
    pattern: "panicked at"
  - id: nightly
    type: schedule
    cron: "0 2 * * *"
variables:
  - name: model
    type: string
    default: small
steps:
  - id: classify
    action:
      type: ai_call
      provider: local
      parameters:
        prompt: "classify {{trigger.message}}"
    connections:
      outputs:
        - target_step_id: notify
          condition:
            type: success
        - target_step_id: fallback
          condition:
            type: failure
  - id: notify
    action: { type: notification }
    connections:
      inputs: [classify]
  - id: fallback
    action: { type: notification }
    connections:
      inputs: [classify]
    error_handling:
      strategy: continue
"#;
        let wf: Workflow = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(wf.triggers.len(), 2);
        assert_eq!(wf.triggers[0].kind.name(), "error");
        assert!(matches!(
            &wf.triggers[1].kind,
            TriggerKind::Schedule { cron } if cron == "0 2 * * *"
        ));
        assert_eq!(wf.root_steps().count(), 1);
        let classify = wf.step("classify").unwrap();
        assert_eq!(classify.action.provider.as_deref(), Some("local"));
        assert!(matches!(
            classify.connections.outputs[1].condition,
            Some(ConnectionCondition::Failure)
        ));
        assert_eq!(
            wf.step("fallback").unwrap().error_strategy(),
            ErrorStrategy::Continue
        );
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy: RetryPolicy = serde_json::from_value(json!({})).unwrap();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff, BackoffType::Exponential);
        assert_eq!(policy.initial_delay_ms, 1_000);
        assert_eq!(policy.max_delay_ms, 30_000);
        assert!(!policy.jitter);
    }

    #[test]
    fn test_error_strategy_aborts() {
        assert!(ErrorStrategy::Fail.aborts());
        assert!(ErrorStrategy::Retry.aborts());
        assert!(!ErrorStrategy::Continue.aborts());
        assert!(!ErrorStrategy::Skip.aborts());
    }

    #[test]
    fn test_variable_type_accepts() {
        assert!(VariableType::String.accepts(&json!("x")));
        assert!(!VariableType::String.accepts(&json!(1)));
        assert!(VariableType::Number.accepts(&json!(1.5)));
        assert!(VariableType::Array.accepts(&json!([])));
        assert!(!VariableType::Object.accepts(&Value::Null));
    }
}
