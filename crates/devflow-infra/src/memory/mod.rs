//! In-memory storage.
//!
//! Workflow definitions and execution history live for the lifetime of the
//! process. Definitions are loaded from workflow files on disk.

pub mod workflow;

pub use workflow::{InMemoryWorkflowRepository, WorkflowStats, load_workflow_dir};
