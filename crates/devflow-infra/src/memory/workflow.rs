//! In-memory workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `devflow-core` with `DashMap` tables.
//! Each workflow keeps a bounded ring of its most recent execution results.

use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use devflow_core::repository::workflow::WorkflowRepository;
use devflow_core::workflow::definition::{WorkflowError, discover_workflows};
use devflow_types::error::RepositoryError;
use devflow_types::execution::{ExecutionResult, ExecutionStatus};
use devflow_types::workflow::Workflow;
use serde::Serialize;
use uuid::Uuid;

/// Results kept per workflow unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Aggregate run statistics for one workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowStats {
    pub total_runs: u64,
    pub successful: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<ExecutionStatus>,
    /// Mean over every recorded run, not just the retained history.
    pub average_duration_ms: u64,
}

impl WorkflowStats {
    fn record(&mut self, result: &ExecutionResult) {
        match result.status {
            ExecutionStatus::Success => self.successful += 1,
            ExecutionStatus::Failure => self.failed += 1,
            ExecutionStatus::Cancelled => self.cancelled += 1,
            ExecutionStatus::Timeout => self.timed_out += 1,
            ExecutionStatus::Running => {}
        }
        let total_ms = u128::from(self.average_duration_ms) * u128::from(self.total_runs)
            + u128::from(result.duration_ms);
        self.total_runs += 1;
        self.average_duration_ms =
            u64::try_from(total_ms / u128::from(self.total_runs)).unwrap_or(u64::MAX);
        self.last_run_at = Some(result.completed_at);
        self.last_status = Some(result.status);
    }
}

#[derive(Debug, Default)]
struct RunHistory {
    stats: WorkflowStats,
    /// Oldest first.
    results: VecDeque<ExecutionResult>,
}

/// Process-local implementation of `WorkflowRepository`.
#[derive(Debug)]
pub struct InMemoryWorkflowRepository {
    workflows: DashMap<Uuid, Workflow>,
    history: DashMap<Uuid, RunHistory>,
    history_limit: usize,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Keep at most `limit` results per workflow (at least one).
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            workflows: DashMap::new(),
            history: DashMap::new(),
            history_limit: limit.max(1),
        }
    }

    /// Insert or replace a workflow. Returns the previous definition.
    pub fn save_workflow(&self, workflow: Workflow) -> Option<Workflow> {
        tracing::debug!(workflow_id = %workflow.id, workflow = %workflow.name, "saving workflow");
        self.workflows.insert(workflow.id, workflow)
    }

    /// Remove a workflow and its history.
    pub fn remove_workflow(&self, id: &Uuid) -> Result<Workflow, RepositoryError> {
        self.history.remove(id);
        self.workflows
            .remove(id)
            .map(|(_, wf)| wf)
            .ok_or(RepositoryError::NotFound)
    }

    /// All workflows, sorted by name.
    pub fn list_workflows(&self) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> = self.workflows.iter().map(|e| e.value().clone()).collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        workflows
    }

    /// Look up a workflow by name.
    pub fn find_by_name(&self, name: &str) -> Option<Workflow> {
        self.workflows
            .iter()
            .find(|e| e.value().name == name)
            .map(|e| e.value().clone())
    }

    /// Run statistics; all zero when the workflow never ran.
    pub fn stats(&self, id: &Uuid) -> WorkflowStats {
        self.history
            .get(id)
            .map(|h| h.stats.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

impl Default for InMemoryWorkflowRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.workflows.get(id).map(|e| e.value().clone()))
    }

    async fn update_execution_stats(
        &self,
        workflow_id: &Uuid,
        result: &ExecutionResult,
    ) -> Result<(), RepositoryError> {
        if !self.workflows.contains_key(workflow_id) {
            return Err(RepositoryError::NotFound);
        }
        let mut history = self.history.entry(*workflow_id).or_default();
        history.stats.record(result);
        history.results.push_back(result.clone());
        while history.results.len() > self.history_limit {
            history.results.pop_front();
        }
        Ok(())
    }

    async fn get_execution_history(
        &self,
        workflow_id: &Uuid,
        limit: usize,
    ) -> Result<Vec<ExecutionResult>, RepositoryError> {
        Ok(self
            .history
            .get(workflow_id)
            .map(|h| h.results.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Discover every workflow file under `dir` and save it into `repo`.
///
/// Files that fail to parse are logged and skipped. When two files share a
/// workflow ID the later path wins. Returns the IDs loaded, in path order.
pub fn load_workflow_dir(
    repo: &InMemoryWorkflowRepository,
    dir: &Path,
) -> Result<Vec<Uuid>, WorkflowError> {
    let mut loaded = Vec::new();
    for (path, workflow) in discover_workflows(dir)? {
        let id = workflow.id;
        if let Some(previous) = repo.save_workflow(workflow) {
            tracing::warn!(
                workflow_id = %id,
                previous = %previous.name,
                path = %path.display(),
                "duplicate workflow id, later file replaces earlier definition"
            );
            loaded.retain(|existing| *existing != id);
        }
        loaded.push(id);
    }
    tracing::info!(dir = %dir.display(), count = loaded.len(), "loaded workflows");
    Ok(loaded)
}
