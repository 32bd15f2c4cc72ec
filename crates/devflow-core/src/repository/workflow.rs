//! Workflow repository trait definition.
//!
//! The engine's only source of workflow definitions and the sink for
//! execution results. The infrastructure layer (devflow-infra) implements
//! this trait; the engine never caches a workflow across calls.

use devflow_types::error::RepositoryError;
use devflow_types::execution::ExecutionResult;
use devflow_types::workflow::Workflow;
use uuid::Uuid;

/// Repository trait for workflow persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    /// Get a workflow by ID. `Ok(None)` when it does not exist.
    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// Record a finished execution against its workflow.
    fn update_execution_stats(
        &self,
        workflow_id: &Uuid,
        result: &ExecutionResult,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Most recent executions of a workflow, newest first.
    fn get_execution_history(
        &self,
        workflow_id: &Uuid,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionResult>, RepositoryError>> + Send;
}
