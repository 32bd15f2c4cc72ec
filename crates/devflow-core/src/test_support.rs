//! Builders and test doubles shared by the in-crate tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use devflow_types::error::RepositoryError;
use devflow_types::execution::{ExecutionResult, StepOutcome};
use devflow_types::workflow::{
    StepAction, StepConnection, StepConnections, Workflow, WorkflowSettings, WorkflowStep,
};
use serde_json::json;
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;
use crate::workflow::context::ExecutionContext;
use crate::workflow::step_executor::{StepError, StepExecutor};

/// Action type every `step()` uses.
pub const MOCK_ACTION: &str = "mock";

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// A `mock` step with unconditional output edges.
pub fn step(id: &str, inputs: &[&str], outputs: &[&str]) -> WorkflowStep {
    WorkflowStep {
        id: id.to_string(),
        name: None,
        action: StepAction {
            action_type: MOCK_ACTION.to_string(),
            provider: None,
            parameters: json!({}),
        },
        connections: StepConnections {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs
                .iter()
                .map(|t| StepConnection {
                    target_step_id: t.to_string(),
                    condition: None,
                })
                .collect(),
        },
        timeout_ms: None,
        retry_policy: None,
        error_handling: None,
    }
}

pub fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
    Workflow {
        id: Uuid::now_v7(),
        name: "test-workflow".to_string(),
        description: None,
        version: "1.0.0".to_string(),
        enabled: true,
        steps,
        triggers: vec![],
        variables: vec![],
        settings: WorkflowSettings::default(),
        metadata: HashMap::new(),
    }
}

// ---------------------------------------------------------------------------
// MockExecutor
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockState {
    calls: AtomicUsize,
    executed: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<String, u32>>,
}

/// Recording executor. Clones share their call log.
///
/// Succeeds with `{"step": <id>, "params": <resolved parameters>}` unless
/// configured otherwise.
#[derive(Clone, Default)]
pub struct MockExecutor {
    state: Arc<MockState>,
    failing: HashSet<String>,
    fail_first: u32,
    erroring: HashSet<String>,
    panicking: HashSet<String>,
    delay: Option<Duration>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// These steps report `success: false` on every attempt.
    pub fn failing(mut self, step_ids: &[&str]) -> Self {
        self.failing.extend(step_ids.iter().map(|s| s.to_string()));
        self
    }

    /// Every step fails its first `n` attempts.
    pub fn fail_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    /// These steps return `Err(StepError::Failed)`.
    pub fn erroring(mut self, step_ids: &[&str]) -> Self {
        self.erroring.extend(step_ids.iter().map(|s| s.to_string()));
        self
    }

    pub fn panicking(mut self, step_ids: &[&str]) -> Self {
        self.panicking.extend(step_ids.iter().map(|s| s.to_string()));
        self
    }

    /// Sleep this long in every attempt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Total attempts across all steps.
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Step IDs in the order their attempts started.
    pub fn executed(&self) -> Vec<String> {
        self.state.executed.lock().unwrap().clone()
    }
}

impl StepExecutor for MockExecutor {
    async fn execute(
        &self,
        step: &WorkflowStep,
        _ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.executed.lock().unwrap().push(step.id.clone());
        let attempt = {
            let mut attempts = self.state.attempts.lock().unwrap();
            let n = attempts.entry(step.id.clone()).or_insert(0);
            *n += 1;
            *n
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panicking.contains(&step.id) {
            panic!("mock executor panicked in step {}", step.id);
        }
        if self.erroring.contains(&step.id) {
            return Err(StepError::Failed(format!("{} exploded", step.id)));
        }
        if self.failing.contains(&step.id) || attempt <= self.fail_first {
            return Ok(StepOutcome::failure(format!(
                "{} failed on attempt {attempt}",
                step.id
            )));
        }
        Ok(StepOutcome::success(json!({
            "step": step.id,
            "params": step.action.parameters,
        })))
    }
}

// ---------------------------------------------------------------------------
// StubRepository
// ---------------------------------------------------------------------------

/// In-memory repository that records every finished execution.
#[derive(Default)]
pub struct StubRepository {
    workflows: Mutex<HashMap<Uuid, Workflow>>,
    results: Mutex<Vec<ExecutionResult>>,
}

impl StubRepository {
    pub fn with(workflows: impl IntoIterator<Item = Workflow>) -> Self {
        let repo = Self::default();
        {
            let mut map = repo.workflows.lock().unwrap();
            for wf in workflows {
                map.insert(wf.id, wf);
            }
        }
        repo
    }

    pub fn results(&self) -> Vec<ExecutionResult> {
        self.results.lock().unwrap().clone()
    }
}

impl WorkflowRepository for StubRepository {
    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.workflows.lock().unwrap().get(id).cloned())
    }

    async fn update_execution_stats(
        &self,
        _workflow_id: &Uuid,
        result: &ExecutionResult,
    ) -> Result<(), RepositoryError> {
        self.results.lock().unwrap().push(result.clone());
        Ok(())
    }

    async fn get_execution_history(
        &self,
        workflow_id: &Uuid,
        limit: usize,
    ) -> Result<Vec<ExecutionResult>, RepositoryError> {
        Ok(self
            .results
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|r| r.workflow_id == *workflow_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
