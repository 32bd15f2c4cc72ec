//! Workflow engine: validation, graph execution and execution lifecycle.
//!
//! `WorkflowEngine` loads a workflow snapshot from the repository, validates
//! it against the executor registry, then walks its step graph one step at a
//! time. Readiness is event-driven: a step reached before all of its inputs
//! have results is parked and only re-queued when its last missing input
//! finishes.
//!
//! # Execution flow
//!
//! 1. Load, check `enabled`, validate, take a per-workflow permit.
//! 2. Build the `ExecutionContext` and register it in the active table.
//! 3. Drive the graph from the root steps, following connections whose
//!    conditions hold.
//! 4. Remove from the active table, emit the terminal event, persist the
//!    result.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use devflow_types::config::EngineConfig;
use devflow_types::event::{EngineEvent, EventType};
use devflow_types::execution::{
    ExecutionOptions, ExecutionResult, ExecutionState, ExecutionStatus, ExecutionStatusReport,
    QueuedExecution, StepExecutionResult, StepStatus, TriggerEvent, ValidationReport,
};
use devflow_types::workflow::{ErrorStrategy, LogLevel, Workflow, WorkflowStep};
use futures_util::FutureExt;
use serde_json::{Value, json};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::{EventBus, EventListener, ListenerId};
use crate::repository::workflow::WorkflowRepository;

use super::condition::ConditionEvaluator;
use super::context::ExecutionContext;
use super::dag;
use super::definition::{WorkflowError, validate_structure};
use super::queue::{ExecutionQueue, ExecutionRunner};
use super::registry::ExecutorRegistry;
use super::resolver::ParameterResolver;
use super::retry::RetryHandler;
use super::step_executor::{BoxStepExecutor, StepError};
use super::trigger::TriggerSink;

// ---------------------------------------------------------------------------
// Public helper types
// ---------------------------------------------------------------------------

/// How a queued execution should be scheduled.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    /// Higher runs first.
    pub priority: i32,
    /// Not promoted before `now + delay`.
    pub delay: Option<Duration>,
    /// Seed for the execution context.
    pub options: Option<ExecutionOptions>,
}

/// What a trigger sink does with a fired event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerDispatch {
    /// Run the workflow immediately.
    #[default]
    Direct,
    /// Enqueue the workflow and let the queue start it.
    Queue,
}

/// An execution currently being driven.
#[derive(Debug)]
struct ActiveExecution {
    workflow_id: Uuid,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    current_step: Option<String>,
    completed_steps: Vec<String>,
    cancel_requested: bool,
}

/// Per-workflow semaphore sized to `settings.concurrency`.
///
/// A lowered limit cannot reclaim permits that are currently held, so the
/// shortfall is recorded in `owed` and forgotten as those permits return.
#[derive(Debug)]
struct ConcurrencyLimit {
    limit: u32,
    semaphore: Arc<Semaphore>,
    owed: usize,
}

impl ConcurrencyLimit {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            semaphore: Arc::new(Semaphore::new(limit as usize)),
            owed: 0,
        }
    }

    fn resize(&mut self, limit: u32) {
        if limit > self.limit {
            let grow = (limit - self.limit) as usize;
            let repaid = grow.min(self.owed);
            self.owed -= repaid;
            self.semaphore.add_permits(grow - repaid);
        } else if limit < self.limit {
            self.owed += (self.limit - limit) as usize;
        }
        self.limit = limit;
    }

    fn settle(&mut self) {
        if self.owed > 0 {
            self.owed -= self.semaphore.forget_permits(self.owed);
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// The workflow orchestrator.
///
/// Generic over `R: WorkflowRepository` for storage flexibility. Create one
/// per process and share it behind an `Arc` when the queue or triggers are
/// used.
pub struct WorkflowEngine<R: WorkflowRepository> {
    repo: Arc<R>,
    registry: Arc<ExecutorRegistry>,
    event_bus: EventBus,
    config: EngineConfig,
    active: DashMap<Uuid, ActiveExecution>,
    concurrency: DashMap<Uuid, ConcurrencyLimit>,
    /// Cancellations requested for queue entries promoted but not yet active.
    pending_cancels: DashSet<Uuid>,
    queue: Arc<ExecutionQueue>,
}

impl<R: WorkflowRepository + 'static> WorkflowEngine<R> {
    pub fn new(
        repo: Arc<R>,
        registry: Arc<ExecutorRegistry>,
        event_bus: EventBus,
        config: EngineConfig,
    ) -> Self {
        let queue = Arc::new(ExecutionQueue::new(
            config.max_concurrent_executions,
            Duration::from_millis(config.queue_tick_ms),
            config.history_limit,
        ));
        Self {
            repo,
            registry,
            event_bus,
            config,
            active: DashMap::new(),
            concurrency: DashMap::new(),
            pending_cancels: DashSet::new(),
            queue,
        }
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<ExecutionQueue> {
        &self.queue
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run a workflow to a terminal status.
    ///
    /// Definition problems (missing, disabled, invalid, concurrency limit)
    /// are returned as `Err` before any step runs. Everything that happens
    /// once the execution started, including panics, ends up in the returned
    /// `ExecutionResult`.
    pub async fn execute_workflow(
        &self,
        workflow_id: Uuid,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult, WorkflowError> {
        let workflow = self
            .repo
            .get_workflow(&workflow_id)
            .await?
            .ok_or(WorkflowError::NotFound(workflow_id))?;
        if !workflow.enabled {
            return Err(WorkflowError::Disabled(workflow_id));
        }

        let report = self.validate_workflow(&workflow);
        if !report.valid {
            tracing::warn!(
                workflow_id = %workflow_id,
                workflow = %workflow.name,
                errors = ?report.errors,
                "refusing to run invalid workflow"
            );
            return Err(WorkflowError::Invalid(report.errors));
        }

        let _permit = self.acquire_concurrency_permit(&workflow)?;

        let execution_id = options.execution_id.unwrap_or_else(Uuid::now_v7);
        let timeout_ms = options
            .timeout_ms
            .or(workflow.settings.timeout_ms)
            .or(self.config.default_workflow_timeout_ms);
        let cancel = CancellationToken::new();
        let trigger = options.trigger.unwrap_or_default();
        let trigger_type = trigger.trigger_type.clone();
        let mut ctx = ExecutionContext::new(execution_id, &workflow, trigger)
            .with_variables(options.variables)
            .with_timeout(timeout_ms)
            .with_dry_run(options.dry_run)
            .with_cancellation(cancel.clone())
            .with_size_limit(self.config.max_context_bytes);

        match self.active.entry(execution_id) {
            Entry::Occupied(_) => {
                return Err(WorkflowError::ExecutionError(format!(
                    "execution {execution_id} is already running"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(ActiveExecution {
                    workflow_id,
                    started_at: ctx.started_at,
                    cancel,
                    current_step: None,
                    completed_steps: Vec::new(),
                    cancel_requested: false,
                });
            }
        }
        if self.pending_cancels.remove(&execution_id).is_some() {
            self.update_active(execution_id, |a| {
                a.cancel_requested = true;
                a.cancel.cancel();
            });
            tracing::info!(%execution_id, "cancellation requested before start");
        }

        self.event_bus.publish(EngineEvent::ExecutionStarted {
            execution_id,
            workflow_id,
            workflow_name: workflow.name.clone(),
            trigger_type: trigger_type.clone(),
            dry_run: ctx.dry_run,
        });
        tracing::info!(
            %execution_id,
            workflow = %workflow.name,
            trigger = %trigger_type,
            dry_run = ctx.dry_run,
            "starting workflow execution"
        );

        let clock = Instant::now();
        let mut step_results = Vec::new();
        let (status, error) = match AssertUnwindSafe(self.run_graph(
            &workflow,
            &mut ctx,
            &mut step_results,
        ))
        .catch_unwind()
        .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(%execution_id, panic = %message, "workflow execution panicked");
                (
                    ExecutionStatus::Failure,
                    Some(format!("execution panicked: {message}")),
                )
            }
        };

        self.active.remove(&execution_id);
        let duration_ms = elapsed_ms(clock);
        let result = ExecutionResult {
            execution_id,
            workflow_id,
            status,
            started_at: ctx.started_at,
            completed_at: Utc::now(),
            duration_ms,
            step_results,
            error,
            dry_run: ctx.dry_run,
        };

        if status == ExecutionStatus::Success {
            self.event_bus.publish(EngineEvent::ExecutionCompleted {
                execution_id,
                workflow_id,
                duration_ms,
                steps_executed: result.step_results.len(),
            });
            tracing::info!(
                %execution_id,
                workflow = %workflow.name,
                duration_ms,
                steps = result.step_results.len(),
                "workflow execution completed"
            );
        } else {
            self.event_bus.publish(EngineEvent::ExecutionFailed {
                execution_id,
                workflow_id,
                status,
                error: result.error.clone(),
                duration_ms,
            });
            tracing::warn!(
                %execution_id,
                workflow = %workflow.name,
                %status,
                error = result.error.as_deref().unwrap_or(""),
                duration_ms,
                "workflow execution did not succeed"
            );
        }

        if let Err(e) = self.repo.update_execution_stats(&workflow_id, &result).await {
            tracing::warn!(%execution_id, error = %e, "failed to record execution result");
        }

        Ok(result)
    }

    /// Structural validation plus executor checks for every step. An
    /// executor that panics while validating is reported as an error.
    pub fn validate_workflow(&self, workflow: &Workflow) -> ValidationReport {
        let mut report = validate_structure(workflow);
        for step in &workflow.steps {
            match self.registry.get(&step.action.action_type) {
                None => report.error(format!(
                    "step '{}': no executor registered for action type '{}'",
                    step.id, step.action.action_type
                )),
                Some(executor) => {
                    match std::panic::catch_unwind(AssertUnwindSafe(|| executor.validate(step))) {
                        Ok(checks) => report.merge(&format!("step '{}': ", step.id), checks),
                        Err(panic) => report.error(format!(
                            "step '{}': executor panicked during validation: {}",
                            step.id,
                            panic_message(panic.as_ref())
                        )),
                    }
                }
            }
        }
        report
    }

    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    /// Enqueue an execution due now with priority 0. The returned ID becomes
    /// the execution ID once the queue starts it.
    pub async fn schedule_workflow(&self, workflow_id: Uuid, trigger: TriggerEvent) -> Uuid {
        self.schedule_with(workflow_id, trigger, ScheduleOptions::default())
            .await
    }

    pub async fn schedule_with(
        &self,
        workflow_id: Uuid,
        trigger: TriggerEvent,
        schedule: ScheduleOptions,
    ) -> Uuid {
        let mut entry = QueuedExecution::new(workflow_id, trigger).with_priority(schedule.priority);
        if let Some(delay) = schedule.delay {
            let due = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| entry.enqueued_at.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            entry = entry.scheduled_at(due);
        }
        if let Some(options) = schedule.options {
            entry = entry.with_context(options);
        }
        self.queue.add(entry).await
    }

    /// Start the queue tick loop. The loop holds only a weak reference to
    /// the engine.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.queue.start(self.queue_runner())
    }

    /// Runs promoted queue entries through `execute_workflow`.
    fn queue_runner(self: &Arc<Self>) -> ExecutionRunner {
        let engine: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |entry: QueuedExecution| {
            let engine = engine.clone();
            Box::pin(async move {
                let Some(engine) = engine.upgrade() else {
                    return Err("engine dropped".to_string());
                };
                let options = entry.execution_options();
                let outcome = engine
                    .execute_workflow(entry.workflow_id, options)
                    .await
                    .map_err(|e| e.to_string());
                engine.pending_cancels.remove(&entry.id);
                outcome
            })
        })
    }

    /// Stop the queue tick loop. Running executions finish normally.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    /// A sink for trigger handlers that starts this workflow engine.
    pub fn trigger_sink(self: &Arc<Self>, dispatch: TriggerDispatch) -> TriggerSink {
        let engine: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |workflow_id: Uuid, event: TriggerEvent| {
            let engine = engine.clone();
            Box::pin(async move {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                match dispatch {
                    TriggerDispatch::Queue => {
                        engine.schedule_workflow(workflow_id, event).await;
                    }
                    TriggerDispatch::Direct => {
                        let options = ExecutionOptions::default().with_trigger(event);
                        if let Err(e) = engine.execute_workflow(workflow_id, options).await {
                            tracing::warn!(%workflow_id, error = %e, "triggered execution rejected");
                        }
                    }
                }
            })
        })
    }

    // -----------------------------------------------------------------------
    // Control and status
    // -----------------------------------------------------------------------

    /// Request cancellation of a running or queued execution.
    ///
    /// A running execution stops at its next checkpoint (before the next
    /// step or during a retry backoff) with status `cancelled`. A pending
    /// queue entry is dropped and recorded as cancelled.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<(), WorkflowError> {
        if let Some(mut active) = self.active.get_mut(&execution_id) {
            active.cancel_requested = true;
            active.cancel.cancel();
            tracing::info!(%execution_id, "cancellation requested");
            return Ok(());
        }
        if self.queue.cancel_pending(execution_id).await {
            return Ok(());
        }
        if self.queue.locate_running(execution_id).await.is_some() {
            // Promoted but not yet active. Whichever side registers second
            // sees the other.
            self.pending_cancels.insert(execution_id);
            if self.active.contains_key(&execution_id)
                && self.pending_cancels.remove(&execution_id).is_some()
            {
                self.update_active(execution_id, |a| {
                    a.cancel_requested = true;
                    a.cancel.cancel();
                });
            }
            tracing::info!(%execution_id, "cancellation requested for starting execution");
            return Ok(());
        }
        Err(WorkflowError::ExecutionNotFound(execution_id))
    }

    /// Where an execution is: running, waiting in the queue, promoted by the
    /// queue but not yet running, or finished through the queue.
    pub async fn get_execution_status(&self, execution_id: Uuid) -> Option<ExecutionStatusReport> {
        if let Some(active) = self.active.get(&execution_id) {
            return Some(ExecutionStatusReport {
                execution_id,
                workflow_id: active.workflow_id,
                state: ExecutionState::Running {
                    started_at: active.started_at,
                    current_step: active.current_step.clone(),
                    completed_steps: active.completed_steps.clone(),
                    cancel_requested: active.cancel_requested,
                },
            });
        }
        if let Some((position, entry)) = self.queue.locate_pending(execution_id).await {
            return Some(ExecutionStatusReport {
                execution_id,
                workflow_id: entry.workflow_id,
                state: ExecutionState::Queued { position },
            });
        }
        if let Some(entry) = self.queue.locate_running(execution_id).await {
            return Some(ExecutionStatusReport {
                execution_id,
                workflow_id: entry.workflow_id,
                state: ExecutionState::Starting {
                    cancel_requested: self.pending_cancels.contains(&execution_id),
                },
            });
        }
        self.queue
            .finished(execution_id)
            .await
            .map(|finished| ExecutionStatusReport {
                execution_id,
                workflow_id: finished.entry.workflow_id,
                state: ExecutionState::Finished {
                    status: finished.status,
                    finished_at: finished.finished_at,
                    error: finished.error,
                },
            })
    }

    /// IDs of executions currently being driven.
    pub fn active_executions(&self) -> Vec<Uuid> {
        self.active.iter().map(|e| *e.key()).collect()
    }

    pub async fn execution_history(
        &self,
        workflow_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ExecutionResult>, WorkflowError> {
        Ok(self.repo.get_execution_history(&workflow_id, limit).await?)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn add_event_listener(&self, event_type: EventType, listener: EventListener) -> ListenerId {
        self.event_bus.add_listener(event_type, listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.event_bus.remove_listener(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_bus.subscribe()
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Take a per-workflow permit when `settings.concurrency` is set.
    fn acquire_concurrency_permit(
        &self,
        workflow: &Workflow,
    ) -> Result<Option<OwnedSemaphorePermit>, WorkflowError> {
        let Some(limit) = workflow.settings.concurrency else {
            return Ok(None);
        };
        let semaphore = {
            let mut entry = self
                .concurrency
                .entry(workflow.id)
                .or_insert_with(|| ConcurrencyLimit::new(limit));
            if entry.limit != limit {
                tracing::debug!(workflow_id = %workflow.id, from = entry.limit, to = limit, "concurrency limit changed");
                entry.resize(limit);
            }
            entry.settle();
            Arc::clone(&entry.semaphore)
        };
        semaphore
            .try_acquire_owned()
            .map(Some)
            .map_err(|_| WorkflowError::ConcurrencyLimitReached(workflow.id))
    }

    /// Walk the step graph. Returns the terminal status and error.
    async fn run_graph(
        &self,
        workflow: &Workflow,
        ctx: &mut ExecutionContext,
        results: &mut Vec<StepExecutionResult>,
    ) -> (ExecutionStatus, Option<String>) {
        let dependents = dag::dependents(&workflow.steps);
        let mut ready: VecDeque<String> = workflow.root_steps().map(|s| s.id.clone()).collect();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut executed: HashSet<String> = HashSet::new();

        while let Some(step_id) = ready.pop_front() {
            if ctx.is_cancelled() {
                return (
                    ExecutionStatus::Cancelled,
                    Some("execution cancelled".to_string()),
                );
            }
            if executed.contains(&step_id) {
                continue;
            }
            let Some(step) = workflow.step(&step_id) else {
                tracing::warn!(execution_id = %ctx.execution_id, %step_id, "connection to unknown step ignored");
                continue;
            };
            if !inputs_complete(step, &executed) {
                tracing::debug!(execution_id = %ctx.execution_id, %step_id, "step waiting for inputs");
                blocked.insert(step_id);
                continue;
            }
            blocked.remove(&step_id);

            self.update_active(ctx.execution_id, |a| a.current_step = Some(step_id.clone()));
            let result = self.execute_step(workflow, step, ctx).await;
            executed.insert(step_id.clone());
            self.update_active(ctx.execution_id, |a| {
                a.current_step = None;
                a.completed_steps.push(step_id.clone());
            });

            if ctx.is_cancelled() {
                results.push(result);
                return (
                    ExecutionStatus::Cancelled,
                    Some("execution cancelled".to_string()),
                );
            }

            if let Some(output) = &result.output {
                if let Err(e) = ctx.set_step_result(&step_id, output.clone()) {
                    results.push(result);
                    return (ExecutionStatus::Failure, Some(e.to_string()));
                }
            }

            if result.status == StepStatus::Failure && step.error_strategy().aborts() {
                let error = format!(
                    "step '{}' failed: {}",
                    step_id,
                    result.error.as_deref().unwrap_or("unknown error")
                );
                results.push(result);
                return (ExecutionStatus::Failure, Some(error));
            }

            for conn in &step.connections.outputs {
                if ConditionEvaluator::should_follow(conn.condition.as_ref(), &result, ctx) {
                    ready.push_back(conn.target_step_id.clone());
                }
            }
            if let Some(waiting) = dependents.get(step_id.as_str()) {
                for dependent in waiting {
                    if blocked.contains(*dependent)
                        && workflow
                            .step(dependent)
                            .is_some_and(|s| inputs_complete(s, &executed))
                    {
                        blocked.remove(*dependent);
                        ready.push_back((*dependent).to_string());
                    }
                }
            }
            results.push(result);

            if ctx.is_past_deadline() {
                return (
                    ExecutionStatus::Timeout,
                    Some("execution exceeded its deadline".to_string()),
                );
            }
        }

        if !blocked.is_empty() {
            let mut never_ran: Vec<&str> = blocked.iter().map(String::as_str).collect();
            never_ran.sort_unstable();
            tracing::warn!(
                execution_id = %ctx.execution_id,
                steps = ?never_ran,
                "steps never received all inputs and did not run"
            );
        }
        (ExecutionStatus::Success, None)
    }

    /// Run one step through its attempts and produce its final result.
    async fn execute_step(
        &self,
        workflow: &Workflow,
        step: &WorkflowStep,
        ctx: &ExecutionContext,
    ) -> StepExecutionResult {
        let execution_id = ctx.execution_id;
        let started_at = Utc::now();
        let clock = Instant::now();

        self.event_bus.publish(EngineEvent::StepStarted {
            execution_id,
            step_id: step.id.clone(),
            action_type: step.action.action_type.clone(),
        });

        let mut attempts = 0u32;
        let (output, error) = match self.registry.get(&step.action.action_type) {
            None => (
                None,
                Some(format!(
                    "no executor registered for action type '{}'",
                    step.action.action_type
                )),
            ),
            Some(executor) => {
                self.run_attempts(workflow, step, ctx, executor, &mut attempts)
                    .await
            }
        };

        let retry_count = attempts.saturating_sub(1);
        let status = match (&error, step.error_strategy()) {
            (None, _) => StepStatus::Success,
            (Some(_), ErrorStrategy::Skip) => StepStatus::Skipped,
            (Some(_), _) => StepStatus::Failure,
        };
        let duration_ms = elapsed_ms(clock);

        match &error {
            None => {
                self.event_bus.publish(EngineEvent::StepCompleted {
                    execution_id,
                    step_id: step.id.clone(),
                    duration_ms,
                    retry_count,
                });
                tracing::debug!(%execution_id, step_id = %step.id, duration_ms, retry_count, "step completed");
            }
            Some(e) => {
                self.event_bus.publish(EngineEvent::StepFailed {
                    execution_id,
                    step_id: step.id.clone(),
                    error: e.clone(),
                    retry_count,
                });
                tracing::warn!(
                    %execution_id,
                    step_id = %step.id,
                    %status,
                    error = %e,
                    retry_count,
                    "step did not succeed"
                );
            }
        }

        StepExecutionResult {
            step_id: step.id.clone(),
            status,
            started_at,
            completed_at: Some(Utc::now()),
            duration_ms,
            output,
            error,
            retry_count,
        }
    }

    /// Attempt loop. Returns `(output, None)` on success and
    /// `(None, Some(last_error))` otherwise.
    async fn run_attempts(
        &self,
        workflow: &Workflow,
        step: &WorkflowStep,
        ctx: &ExecutionContext,
        executor: &BoxStepExecutor,
        attempts: &mut u32,
    ) -> (Option<Value>, Option<String>) {
        let resolved = ParameterResolver::resolve_step(step, ctx);
        if workflow.settings.log_level == LogLevel::Debug {
            tracing::debug!(execution_id = %ctx.execution_id, step_id = %step.id, parameters = %resolved.action.parameters, "resolved step parameters");
        } else {
            tracing::trace!(execution_id = %ctx.execution_id, step_id = %step.id, parameters = %resolved.action.parameters, "resolved step parameters");
        }

        let policy = RetryHandler::effective_policy(step, &workflow.settings);
        let timeout_ms = step.timeout_ms.unwrap_or(self.config.default_step_timeout_ms);
        if ctx.dry_run {
            *attempts = 1;
            return (Some(json!({ "simulated": true })), None);
        }
        let mut last_error = String::new();

        loop {
            *attempts += 1;

            match run_attempt(executor, &resolved, ctx, timeout_ms).await {
                Ok(output) => return (output, None),
                Err(e) => last_error = e,
            }

            if !RetryHandler::should_retry(&policy, *attempts) {
                break;
            }
            let delay = RetryHandler::backoff(&policy, *attempts);
            tracing::debug!(
                execution_id = %ctx.execution_id,
                step_id = %step.id,
                attempt = *attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "retrying step"
            );
            tokio::select! {
                _ = ctx.cancellation().cancelled() => {
                    last_error = format!("{last_error} (retries abandoned: execution cancelled)");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        (None, Some(last_error))
    }

    fn update_active(&self, execution_id: Uuid, f: impl FnOnce(&mut ActiveExecution)) {
        if let Some(mut active) = self.active.get_mut(&execution_id) {
            f(&mut active);
        }
    }
}

impl<R: WorkflowRepository> std::fmt::Debug for WorkflowEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("executors", &self.registry.len())
            .field("active", &self.active.len())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

/// One attempt, raced against the step timeout. Panics become errors.
async fn run_attempt(
    executor: &BoxStepExecutor,
    step: &WorkflowStep,
    ctx: &ExecutionContext,
    timeout_ms: u64,
) -> Result<Option<Value>, String> {
    let attempt = AssertUnwindSafe(executor.execute(step, ctx)).catch_unwind();
    match tokio::time::timeout(Duration::from_millis(timeout_ms), attempt).await {
        Err(_) => Err(StepError::Timeout(timeout_ms).to_string()),
        Ok(Err(panic)) => Err(format!("executor panicked: {}", panic_message(panic.as_ref()))),
        Ok(Ok(Err(e))) => Err(e.to_string()),
        Ok(Ok(Ok(outcome))) if outcome.success => Ok(outcome.output),
        Ok(Ok(Ok(outcome))) => Err(outcome
            .error
            .unwrap_or_else(|| "step reported failure".to_string())),
    }
}

fn inputs_complete(step: &WorkflowStep, executed: &HashSet<String>) -> bool {
    step.connections
        .inputs
        .iter()
        .all(|input| executed.contains(input))
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub(super) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
