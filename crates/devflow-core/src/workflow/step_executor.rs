//! Step executor contract and its object-safe wrapper.
//!
//! Follows the blanket-impl pattern used for other RPITIT traits:
//! 1. `StepExecutor` uses native async fn in trait
//! 2. `StepExecutorDyn` is the object-safe mirror with boxed futures,
//!    blanket-implemented for every `T: StepExecutor`
//! 3. `BoxStepExecutor` wraps `Box<dyn StepExecutorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use devflow_types::execution::{StepOutcome, ValidationReport};
use devflow_types::workflow::WorkflowStep;
use serde_json::{Value, json};

use super::context::ExecutionContext;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors an executor may return for a single attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("step timed out after {0} ms")]
    Timeout(u64),

    #[error("step cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Performs the action of one step type (`shell`, `ai_call`, `echo`, ...).
///
/// `step` arrives with its parameters already resolved. Long-running
/// executors should watch `ctx.cancellation()`.
pub trait StepExecutor: Send + Sync {
    fn execute(
        &self,
        step: &WorkflowStep,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<StepOutcome, StepError>> + Send;

    /// Executor-specific checks merged into workflow validation.
    fn validate(&self, _step: &WorkflowStep) -> ValidationReport {
        ValidationReport::new()
    }

    /// JSON Schema for `action.parameters`.
    fn parameter_schema(&self) -> Value {
        json!({ "type": "object" })
    }
}

/// Object-safe version of [`StepExecutor`] with boxed futures.
pub trait StepExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        step: &'a WorkflowStep,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome, StepError>> + Send + 'a>>;

    fn validate_dyn(&self, step: &WorkflowStep) -> ValidationReport;

    fn parameter_schema_dyn(&self) -> Value;
}

impl<T: StepExecutor> StepExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        step: &'a WorkflowStep,
        ctx: &'a ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<StepOutcome, StepError>> + Send + 'a>> {
        Box::pin(self.execute(step, ctx))
    }

    fn validate_dyn(&self, step: &WorkflowStep) -> ValidationReport {
        StepExecutor::validate(self, step)
    }

    fn parameter_schema_dyn(&self) -> Value {
        StepExecutor::parameter_schema(self)
    }
}

/// Type-erased step executor stored in the registry.
pub struct BoxStepExecutor {
    inner: Box<dyn StepExecutorDyn>,
}

impl BoxStepExecutor {
    pub fn new<T: StepExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub async fn execute(
        &self,
        step: &WorkflowStep,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        self.inner.execute_boxed(step, ctx).await
    }

    pub fn validate(&self, step: &WorkflowStep) -> ValidationReport {
        self.inner.validate_dyn(step)
    }

    pub fn parameter_schema(&self) -> Value {
        self.inner.parameter_schema_dyn()
    }
}

impl std::fmt::Debug for BoxStepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStepExecutor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{step, workflow};
    use devflow_types::execution::TriggerEvent;
    use uuid::Uuid;

    struct Upper;

    impl StepExecutor for Upper {
        async fn execute(
            &self,
            step: &WorkflowStep,
            _ctx: &ExecutionContext,
        ) -> Result<StepOutcome, StepError> {
            let text = step.action.parameters["text"]
                .as_str()
                .ok_or_else(|| StepError::InvalidParameters("text is required".to_string()))?;
            Ok(StepOutcome::success(json!(text.to_uppercase())))
        }

        fn validate(&self, step: &WorkflowStep) -> ValidationReport {
            let mut report = ValidationReport::new();
            if step.action.parameters.get("text").is_none() {
                report.error("missing 'text'");
            }
            report
        }
    }

    #[tokio::test]
    async fn test_boxed_executor_delegates() {
        let boxed = BoxStepExecutor::new(Upper);
        let wf = workflow(vec![step("a", &[], &[])]);
        let ctx = ExecutionContext::new(Uuid::now_v7(), &wf, TriggerEvent::manual());

        let mut s = step("a", &[], &[]);
        s.action.parameters = json!({"text": "hi"});
        let outcome = boxed.execute(&s, &ctx).await.unwrap();
        assert_eq!(outcome.output, Some(json!("HI")));

        s.action.parameters = json!({});
        let err = boxed.execute(&s, &ctx).await.unwrap_err();
        assert!(matches!(err, StepError::InvalidParameters(_)));
        assert!(!boxed.validate(&s).valid);
    }

    #[test]
    fn test_default_schema() {
        assert_eq!(BoxStepExecutor::new(Upper).parameter_schema(), json!({"type": "object"}));
    }
}
