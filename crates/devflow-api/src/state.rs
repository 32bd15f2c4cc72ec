//! Application state wiring the engine together.
//!
//! The engine is generic over its repository; AppState pins it to the
//! in-memory implementation from devflow-infra.

use std::sync::Arc;

use devflow_core::event::EventBus;
use devflow_core::workflow::engine::WorkflowEngine;
use devflow_infra::executor::builtin_registry;
use devflow_infra::memory::InMemoryWorkflowRepository;
use devflow_types::config::EngineConfig;

pub type ConcreteEngine = WorkflowEngine<InMemoryWorkflowRepository>;

/// Shared state for every CLI command.
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub repo: Arc<InMemoryWorkflowRepository>,
    pub config: EngineConfig,
}

impl AppState {
    /// Build the repository, executor registry and engine from `config`.
    pub fn init(config: EngineConfig) -> anyhow::Result<Self> {
        let repo = Arc::new(InMemoryWorkflowRepository::with_history_limit(
            config.history_limit,
        ));
        let registry = Arc::new(builtin_registry()?);
        let event_bus = EventBus::new(config.event_capacity);

        let engine = Arc::new(WorkflowEngine::new(
            Arc::clone(&repo),
            registry,
            event_bus,
            config.clone(),
        ));
        tracing::debug!(?engine, "engine initialized");

        Ok(Self {
            engine,
            repo,
            config,
        })
    }
}
