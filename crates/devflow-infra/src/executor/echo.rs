//! `echo` executor: returns its resolved parameters as output.

use devflow_core::workflow::context::ExecutionContext;
use devflow_core::workflow::step_executor::{StepError, StepExecutor};
use devflow_types::execution::{StepOutcome, ValidationReport};
use devflow_types::workflow::WorkflowStep;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::is_placeholder;

pub const ACTION_TYPE: &str = "echo";

/// Parameters of an `echo` step. Unknown keys are echoed back unchanged.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct EchoParams {
    /// Free text included in the output.
    #[serde(default)]
    pub message: Option<String>,
    /// Report a failed attempt instead of succeeding.
    #[serde(default)]
    pub fail: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoExecutor;

impl StepExecutor for EchoExecutor {
    async fn execute(
        &self,
        step: &WorkflowStep,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        let params: EchoParams = serde_json::from_value(step.action.parameters.clone())
            .map_err(|e| StepError::InvalidParameters(e.to_string()))?;

        tracing::debug!(
            execution_id = %ctx.execution_id,
            step_id = %step.id,
            message = params.message.as_deref().unwrap_or(""),
            "echo"
        );

        if params.fail {
            let reason = params
                .message
                .unwrap_or_else(|| format!("step '{}' was asked to fail", step.id));
            return Ok(StepOutcome::failure(reason));
        }
        Ok(StepOutcome::success(step.action.parameters.clone()))
    }

    fn validate(&self, step: &WorkflowStep) -> ValidationReport {
        let mut report = ValidationReport::new();
        let Some(params) = step.action.parameters.as_object() else {
            report.error("parameters must be an object");
            return report;
        };
        if let Some(fail) = params.get("fail") {
            if !fail.is_boolean() && !is_placeholder(fail) {
                report.error("'fail' must be a boolean");
            }
        }
        if let Some(message) = params.get("message") {
            if !message.is_string() {
                report.error("'message' must be a string");
            }
        }
        report
    }

    fn parameter_schema(&self) -> Value {
        schemars::schema_for!(EchoParams).to_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_core::workflow::definition::parse_workflow_yaml;
    use devflow_types::execution::TriggerEvent;
    use serde_json::json;
    use uuid::Uuid;

    fn echo_step(parameters: Value) -> (WorkflowStep, ExecutionContext) {
        let yaml = format!(
            "id: {}\nname: echo-test\nsteps:\n  - id: say\n    action:\n      type: echo\n",
            Uuid::now_v7()
        );
        let workflow = parse_workflow_yaml(&yaml).unwrap();
        let ctx = ExecutionContext::new(Uuid::now_v7(), &workflow, TriggerEvent::manual());
        let mut step = workflow.steps[0].clone();
        step.action.parameters = parameters;
        (step, ctx)
    }

    #[tokio::test]
    async fn test_echoes_parameters() {
        let params = json!({ "message": "hi", "extra": [1, 2] });
        let (step, ctx) = echo_step(params.clone());
        let outcome = EchoExecutor.execute(&step, &ctx).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, Some(params));
    }

    #[tokio::test]
    async fn test_fail_flag_reports_failure() {
        let (step, ctx) = echo_step(json!({ "fail": true, "message": "lint errors" }));
        let outcome = EchoExecutor.execute(&step, &ctx).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("lint errors"));
    }

    #[tokio::test]
    async fn test_unresolved_fail_flag_is_invalid_at_runtime() {
        let (step, ctx) = echo_step(json!({ "fail": "{{ variables.missing }}" }));
        let err = EchoExecutor.execute(&step, &ctx).await.unwrap_err();
        assert!(matches!(err, StepError::InvalidParameters(_)));
    }

    #[test]
    fn test_validate_checks_types() {
        let (step, _) = echo_step(json!({ "fail": "yes", "message": 3 }));
        let report = EchoExecutor.validate(&step);
        assert_eq!(report.errors.len(), 2);

        let (step, _) = echo_step(json!({ "fail": "{{ variables.should_fail }}" }));
        assert!(EchoExecutor.validate(&step).valid);

        let (step, _) = echo_step(json!(["not", "an", "object"]));
        assert!(!EchoExecutor.validate(&step).valid);
    }
}
