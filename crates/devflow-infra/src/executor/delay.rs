//! `delay` executor: waits, then succeeds.

use std::time::Duration;

use devflow_core::workflow::context::ExecutionContext;
use devflow_core::workflow::step_executor::{StepError, StepExecutor};
use devflow_types::execution::{StepOutcome, ValidationReport};
use devflow_types::workflow::WorkflowStep;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use super::is_placeholder;

pub const ACTION_TYPE: &str = "delay";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DelayParams {
    /// How long to wait, in milliseconds.
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DelayExecutor;

impl StepExecutor for DelayExecutor {
    async fn execute(
        &self,
        step: &WorkflowStep,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        let params: DelayParams = serde_json::from_value(step.action.parameters.clone())
            .map_err(|e| StepError::InvalidParameters(e.to_string()))?;

        tokio::select! {
            _ = ctx.cancellation().cancelled() => {
                tracing::debug!(execution_id = %ctx.execution_id, step_id = %step.id, "delay interrupted by cancellation");
                Err(StepError::Cancelled)
            }
            _ = tokio::time::sleep(Duration::from_millis(params.duration_ms)) => {
                Ok(StepOutcome::success(json!({ "slept_ms": params.duration_ms })))
            }
        }
    }

    fn validate(&self, step: &WorkflowStep) -> ValidationReport {
        let mut report = ValidationReport::new();
        match step.action.parameters.get("duration_ms") {
            None => report.error("missing required parameter 'duration_ms'"),
            Some(v) if v.is_u64() || is_placeholder(v) => {}
            Some(_) => report.error("'duration_ms' must be a non-negative integer"),
        }
        report
    }

    fn parameter_schema(&self) -> Value {
        schemars::schema_for!(DelayParams).to_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_core::workflow::definition::parse_workflow_yaml;
    use devflow_types::execution::TriggerEvent;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn delay_step(parameters: Value, cancel: CancellationToken) -> (WorkflowStep, ExecutionContext) {
        let yaml = format!(
            "id: {}\nname: delay-test\nsteps:\n  - id: wait\n    action:\n      type: delay\n",
            Uuid::now_v7()
        );
        let workflow = parse_workflow_yaml(&yaml).unwrap();
        let ctx = ExecutionContext::new(Uuid::now_v7(), &workflow, TriggerEvent::manual())
            .with_cancellation(cancel);
        let mut step = workflow.steps[0].clone();
        step.action.parameters = parameters;
        (step, ctx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_then_succeeds() {
        let (step, ctx) = delay_step(json!({ "duration_ms": 500 }), CancellationToken::new());
        let started = tokio::time::Instant::now();
        let outcome = DelayExecutor.execute(&step, &ctx).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, Some(json!({ "slept_ms": 500 })));
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let (step, ctx) = delay_step(json!({ "duration_ms": 60_000 }), cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = DelayExecutor.execute(&step, &ctx).await.unwrap_err();
        assert!(matches!(err, StepError::Cancelled));
    }

    #[test]
    fn test_validate_requires_duration() {
        let cancel = CancellationToken::new();
        let (step, _) = delay_step(json!({}), cancel.clone());
        assert!(!DelayExecutor.validate(&step).valid);

        let (step, _) = delay_step(json!({ "duration_ms": -5 }), cancel.clone());
        assert!(!DelayExecutor.validate(&step).valid);

        let (step, _) = delay_step(json!({ "duration_ms": "{{ variables.wait }}" }), cancel);
        assert!(DelayExecutor.validate(&step).valid);
    }
}
