//! Per-execution state.
//!
//! `ExecutionContext` is created when an execution starts and dropped when it
//! reaches a terminal status. It carries the trigger, the resolved variables,
//! every finished step's output, the execution deadline and the cancellation
//! token. Outputs are stored exactly as the executor returned them; an
//! optional byte cap bounds their total size.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use devflow_types::execution::TriggerEvent;
use devflow_types::workflow::Workflow;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// State shared by every step of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub trigger: TriggerEvent,
    /// Declared defaults overlaid with caller-supplied values.
    pub variables: HashMap<String, Value>,
    /// Outputs of finished steps keyed by step ID.
    pub step_results: HashMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub dry_run: bool,
    cancellation: CancellationToken,
    max_size: Option<usize>,
    output_sizes: HashMap<String, usize>,
}

impl ExecutionContext {
    /// Fresh context for `workflow` with its declared variable defaults.
    pub fn new(execution_id: Uuid, workflow: &Workflow, trigger: TriggerEvent) -> Self {
        let variables = workflow
            .variables
            .iter()
            .filter_map(|v| v.default.clone().map(|d| (v.name.clone(), d)))
            .collect();

        Self {
            execution_id,
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            trigger,
            variables,
            step_results: HashMap::new(),
            started_at: Utc::now(),
            deadline: None,
            dry_run: false,
            cancellation: CancellationToken::new(),
            max_size: None,
            output_sizes: HashMap::new(),
        }
    }

    /// Overlay caller-supplied variables on the declared defaults.
    pub fn with_variables(mut self, overrides: HashMap<String, Value>) -> Self {
        self.variables.extend(overrides);
        self
    }

    /// Set the deadline to `timeout_ms` after `started_at`.
    pub fn with_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        let started_at = self.started_at;
        self.deadline = timeout_ms
            .and_then(|ms| i64::try_from(ms).ok())
            .and_then(Duration::try_milliseconds)
            .and_then(|d| started_at.checked_add_signed(d));
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Cap the total serialized size of stored outputs.
    pub fn with_size_limit(mut self, max_bytes: Option<usize>) -> Self {
        self.max_size = max_bytes;
        self
    }

    /// Store the output of a finished step.
    ///
    /// The output is kept as is. Exceeding the size limit, when one is set,
    /// is an execution error.
    pub fn set_step_result(&mut self, step_id: &str, output: Value) -> Result<(), WorkflowError> {
        if let Some(max) = self.max_size {
            let size = serde_json::to_vec(&output)
                .map_err(|e| WorkflowError::ExecutionError(e.to_string()))?
                .len();
            self.output_sizes.insert(step_id.to_string(), size);
            let total = self.total_size();
            if total > max {
                tracing::warn!(
                    execution_id = %self.execution_id,
                    step_id,
                    total,
                    max,
                    "step outputs exceed context size limit"
                );
                self.step_results.insert(step_id.to_string(), output);
                return Err(WorkflowError::ExecutionError(format!(
                    "total context size ({total} bytes) exceeds maximum ({max} bytes)"
                )));
            }
        }
        self.step_results.insert(step_id.to_string(), output);
        Ok(())
    }

    /// Output of a finished step.
    pub fn step_result(&self, step_id: &str) -> Option<&Value> {
        self.step_results.get(step_id)
    }

    /// Serialized size of all stored step outputs. Only tracked while a
    /// size limit is set.
    pub fn total_size(&self) -> usize {
        self.output_sizes.values().sum()
    }

    pub fn is_past_deadline(&self) -> bool {
        self.deadline.is_some_and(|d| Utc::now() > d)
    }

    /// Time left before the deadline, if one is set. Zero once it has passed.
    pub fn remaining(&self) -> Option<std::time::Duration> {
        self.deadline
            .map(|d| (d - Utc::now()).to_std().unwrap_or_default())
    }

    /// Token cancelled when the execution is cancelled. Long-running
    /// executors should select on `cancelled()`.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{step, workflow};
    use devflow_types::workflow::{VariableType, WorkflowVariable};
    use serde_json::json;

    fn context() -> ExecutionContext {
        let mut wf = workflow(vec![step("a", &[], &[])]);
        wf.variables = vec![
            WorkflowVariable {
                name: "branch".to_string(),
                var_type: VariableType::String,
                default: Some(json!("main")),
                description: None,
            },
            WorkflowVariable {
                name: "verbose".to_string(),
                var_type: VariableType::Boolean,
                default: None,
                description: None,
            },
        ];
        ExecutionContext::new(Uuid::now_v7(), &wf, TriggerEvent::manual())
    }

    #[test]
    fn test_defaults_then_overrides() {
        let ctx = context();
        assert_eq!(ctx.variables.get("branch"), Some(&json!("main")));
        assert!(!ctx.variables.contains_key("verbose"));

        let overrides = HashMap::from([("branch".to_string(), json!("release"))]);
        let ctx = ctx.with_variables(overrides);
        assert_eq!(ctx.variables["branch"], json!("release"));
    }

    #[test]
    fn test_set_and_get_step_result() {
        let mut ctx = context();
        ctx.set_step_result("lint", json!({"warnings": 3})).unwrap();
        assert_eq!(ctx.step_result("lint"), Some(&json!({"warnings": 3})));
        assert!(ctx.step_result("missing").is_none());
    }

    #[test]
    fn test_large_output_stored_verbatim() {
        let mut ctx = context();
        let big = "x".repeat(2 * 1_048_576);
        ctx.set_step_result("dump", json!({ "log": big })).unwrap();

        let stored = ctx.step_result("dump").unwrap();
        assert_eq!(stored["log"].as_str().map(str::len), Some(2 * 1_048_576));
        assert!(stored.get("_truncated").is_none());
    }

    #[test]
    fn test_no_total_limit_by_default() {
        let mut ctx = context();
        let chunk = "y".repeat(1_000_000);
        for i in 0..12 {
            ctx.set_step_result(&format!("s{i}"), json!(chunk)).unwrap();
        }
        assert_eq!(ctx.step_results.len(), 12);
    }

    #[test]
    fn test_opt_in_total_size_limit() {
        let mut ctx = context().with_size_limit(Some(1_000));
        ctx.set_step_result("a", json!("z".repeat(600))).unwrap();
        let result = ctx.set_step_result("b", json!("z".repeat(600)));
        assert!(matches!(result, Err(WorkflowError::ExecutionError(_))));
    }

    #[test]
    fn test_replacing_output_does_not_double_count() {
        let mut ctx = context().with_size_limit(Some(1_000));
        ctx.set_step_result("a", json!("first")).unwrap();
        let before = ctx.total_size();
        ctx.set_step_result("a", json!("first")).unwrap();
        assert_eq!(ctx.total_size(), before);
    }

    #[test]
    fn test_deadline() {
        let ctx = context().with_timeout(None);
        assert!(!ctx.is_past_deadline());
        assert!(ctx.remaining().is_none());

        let mut ctx = context();
        ctx.started_at = Utc::now() - Duration::seconds(5);
        let ctx = ctx.with_timeout(Some(10));
        assert!(ctx.is_past_deadline());
        assert_eq!(ctx.remaining(), Some(std::time::Duration::ZERO));
    }

    #[test]
    fn test_cancellation_token_shared() {
        let parent = CancellationToken::new();
        let ctx = context().with_cancellation(parent.child_token());
        assert!(!ctx.is_cancelled());
        parent.cancel();
        assert!(ctx.is_cancelled());
    }
}
