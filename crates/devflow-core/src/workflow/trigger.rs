//! Trigger manager that binds workflow triggers to their event sources.
//!
//! Each trigger kind (`schedule`, `file_change`, `webhook`, ...) is served by
//! a [`TriggerHandler`]. Activating a workflow hands every enabled trigger to
//! the handler for its kind together with a [`TriggerSink`]; the handler
//! calls the sink whenever its source fires. `manual` triggers need no
//! handler and are fired through [`TriggerManager::fire`].

use std::collections::HashMap;
use std::sync::Arc;

use devflow_types::execution::TriggerEvent;
use devflow_types::workflow::{TriggerKind, Workflow, WorkflowTrigger};
use futures_util::future::BoxFuture;
use tokio::sync::RwLock;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("trigger setup failed: {0}")]
    SetupFailed(String),

    #[error("trigger teardown failed: {0}")]
    TeardownFailed(String),

    #[error("workflow {0} has no active triggers")]
    WorkflowNotFound(Uuid),

    #[error("a handler for trigger kind '{0}' is already registered")]
    DuplicateHandler(String),
}

// ---------------------------------------------------------------------------
// Handler contract
// ---------------------------------------------------------------------------

/// Callback a handler invokes when its source fires.
pub type TriggerSink = Arc<dyn Fn(Uuid, TriggerEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Event source adapter for one trigger kind.
pub trait TriggerHandler: Send + Sync {
    /// The `type` tag this handler serves, e.g. `"schedule"`.
    fn kind(&self) -> &'static str;

    /// Start delivering events for `trigger` to `sink`.
    fn setup<'a>(
        &'a self,
        trigger: &'a WorkflowTrigger,
        workflow_id: Uuid,
        sink: TriggerSink,
    ) -> BoxFuture<'a, Result<(), TriggerError>>;

    /// Stop delivering events for a trigger previously set up.
    fn teardown<'a>(
        &'a self,
        workflow_id: Uuid,
        trigger_id: &'a str,
    ) -> BoxFuture<'a, Result<(), TriggerError>>;
}

// ---------------------------------------------------------------------------
// TriggerRegistration
// ---------------------------------------------------------------------------

/// A trigger of an active workflow.
#[derive(Debug, Clone)]
pub struct TriggerRegistration {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub trigger: WorkflowTrigger,
    /// Whether a handler is delivering events for it.
    pub bound: bool,
}

// ---------------------------------------------------------------------------
// TriggerManager
// ---------------------------------------------------------------------------

/// Registry of trigger handlers and active workflow triggers.
pub struct TriggerManager {
    handlers: RwLock<HashMap<&'static str, Arc<dyn TriggerHandler>>>,
    registrations: Arc<RwLock<HashMap<Uuid, Vec<TriggerRegistration>>>>,
    sink: TriggerSink,
}

impl TriggerManager {
    /// Manager whose handlers deliver events to `sink`.
    pub fn new(sink: TriggerSink) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            registrations: Arc::new(RwLock::new(HashMap::new())),
            sink,
        }
    }

    pub async fn register_handler(
        &self,
        handler: Arc<dyn TriggerHandler>,
    ) -> Result<(), TriggerError> {
        let kind = handler.kind();
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(kind) {
            return Err(TriggerError::DuplicateHandler(kind.to_string()));
        }
        handlers.insert(kind, handler);
        tracing::debug!(kind, "registered trigger handler");
        Ok(())
    }

    /// Bind every enabled trigger of `workflow`, replacing any earlier
    /// activation.
    ///
    /// Returns the IDs of triggers whose kind has no handler; they stay
    /// registered but unbound. A handler failing to set up aborts the
    /// activation and unwinds the triggers already bound.
    pub async fn activate_workflow(&self, workflow: &Workflow) -> Result<Vec<String>, TriggerError> {
        self.deactivate_workflow(workflow.id).await;

        let handlers = self.handlers.read().await;
        let mut regs = Vec::new();
        let mut unbound = Vec::new();

        for trigger in workflow.triggers.iter().filter(|t| t.enabled) {
            let kind = trigger.kind.name();
            let bound = match (&trigger.kind, handlers.get(kind)) {
                (TriggerKind::Manual, _) => false,
                (_, Some(handler)) => {
                    if let Err(e) = handler
                        .setup(trigger, workflow.id, Arc::clone(&self.sink))
                        .await
                    {
                        tracing::error!(
                            workflow = %workflow.name,
                            trigger_id = %trigger.id,
                            error = %e,
                            "trigger setup failed"
                        );
                        Self::teardown_all(&handlers, &regs).await;
                        return Err(e);
                    }
                    true
                }
                (_, None) => {
                    tracing::warn!(
                        workflow = %workflow.name,
                        trigger_id = %trigger.id,
                        kind,
                        "no handler for trigger kind, trigger not bound"
                    );
                    unbound.push(trigger.id.clone());
                    false
                }
            };

            regs.push(TriggerRegistration {
                workflow_id: workflow.id,
                workflow_name: workflow.name.clone(),
                trigger: trigger.clone(),
                bound,
            });
        }

        tracing::info!(
            workflow_id = %workflow.id,
            workflow = %workflow.name,
            trigger_count = regs.len(),
            unbound = unbound.len(),
            "activated workflow triggers"
        );

        self.registrations.write().await.insert(workflow.id, regs);
        Ok(unbound)
    }

    /// Tear down every trigger of a workflow. Returns how many were
    /// registered.
    pub async fn deactivate_workflow(&self, workflow_id: Uuid) -> usize {
        let Some(regs) = self.registrations.write().await.remove(&workflow_id) else {
            return 0;
        };
        let handlers = self.handlers.read().await;
        Self::teardown_all(&handlers, &regs).await;
        tracing::info!(%workflow_id, "deactivated workflow triggers");
        regs.len()
    }

    /// Deliver `event` for an active workflow, as if one of its sources
    /// fired.
    pub async fn fire(&self, workflow_id: Uuid, event: TriggerEvent) -> Result<(), TriggerError> {
        if !self.registrations.read().await.contains_key(&workflow_id) {
            return Err(TriggerError::WorkflowNotFound(workflow_id));
        }
        tracing::debug!(%workflow_id, trigger_type = %event.trigger_type, "trigger fired");
        (self.sink)(workflow_id, event).await;
        Ok(())
    }

    pub async fn registrations(&self, workflow_id: Uuid) -> Vec<TriggerRegistration> {
        self.registrations
            .read()
            .await
            .get(&workflow_id)
            .cloned()
            .unwrap_or_default()
    }

    /// IDs of every workflow with active triggers.
    pub async fn active_workflows(&self) -> Vec<Uuid> {
        self.registrations.read().await.keys().copied().collect()
    }

    /// Deactivate every workflow.
    pub async fn shutdown(&self) {
        for workflow_id in self.active_workflows().await {
            self.deactivate_workflow(workflow_id).await;
        }
    }

    async fn teardown_all(
        handlers: &HashMap<&'static str, Arc<dyn TriggerHandler>>,
        regs: &[TriggerRegistration],
    ) {
        for reg in regs.iter().filter(|r| r.bound) {
            let Some(handler) = handlers.get(reg.trigger.kind.name()) else {
                continue;
            };
            if let Err(e) = handler.teardown(reg.workflow_id, &reg.trigger.id).await {
                tracing::warn!(
                    workflow_id = %reg.workflow_id,
                    trigger_id = %reg.trigger.id,
                    error = %e,
                    "trigger teardown failed"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
