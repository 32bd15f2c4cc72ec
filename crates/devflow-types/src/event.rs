//! Engine lifecycle events.
//!
//! `EngineEvent` is broadcast on the engine's event bus and handed to typed
//! listeners. All variants are Clone + Send + Sync for use with tokio
//! broadcast channels.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::ExecutionStatus;

/// Events emitted while executions and their steps progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    #[serde(rename = "execution.started")]
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: Uuid,
        workflow_name: String,
        trigger_type: String,
        dry_run: bool,
    },

    /// The execution finished with status `success`.
    #[serde(rename = "execution.completed")]
    ExecutionCompleted {
        execution_id: Uuid,
        workflow_id: Uuid,
        duration_ms: u64,
        steps_executed: usize,
    },

    /// The execution finished with any non-success status.
    #[serde(rename = "execution.failed")]
    ExecutionFailed {
        execution_id: Uuid,
        workflow_id: Uuid,
        status: ExecutionStatus,
        error: Option<String>,
        duration_ms: u64,
    },

    #[serde(rename = "step.started")]
    StepStarted {
        execution_id: Uuid,
        step_id: String,
        action_type: String,
    },

    #[serde(rename = "step.completed")]
    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        duration_ms: u64,
        retry_count: u32,
    },

    #[serde(rename = "step.failed")]
    StepFailed {
        execution_id: Uuid,
        step_id: String,
        error: String,
        retry_count: u32,
    },
}

impl EngineEvent {
    /// The listener key for this event.
    pub fn event_type(&self) -> EventType {
        match self {
            EngineEvent::ExecutionStarted { .. } => EventType::ExecutionStarted,
            EngineEvent::ExecutionCompleted { .. } => EventType::ExecutionCompleted,
            EngineEvent::ExecutionFailed { .. } => EventType::ExecutionFailed,
            EngineEvent::StepStarted { .. } => EventType::StepStarted,
            EngineEvent::StepCompleted { .. } => EventType::StepCompleted,
            EngineEvent::StepFailed { .. } => EventType::StepFailed,
        }
    }

    /// Every variant carries the execution it belongs to.
    pub fn execution_id(&self) -> Uuid {
        match self {
            EngineEvent::ExecutionStarted { execution_id, .. }
            | EngineEvent::ExecutionCompleted { execution_id, .. }
            | EngineEvent::ExecutionFailed { execution_id, .. }
            | EngineEvent::StepStarted { execution_id, .. }
            | EngineEvent::StepCompleted { execution_id, .. }
            | EngineEvent::StepFailed { execution_id, .. } => *execution_id,
        }
    }
}

/// The six subscribable event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "execution.started")]
    ExecutionStarted,
    #[serde(rename = "execution.completed")]
    ExecutionCompleted,
    #[serde(rename = "execution.failed")]
    ExecutionFailed,
    #[serde(rename = "step.started")]
    StepStarted,
    #[serde(rename = "step.completed")]
    StepCompleted,
    #[serde(rename = "step.failed")]
    StepFailed,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::ExecutionStarted,
        EventType::ExecutionCompleted,
        EventType::ExecutionFailed,
        EventType::StepStarted,
        EventType::StepCompleted,
        EventType::StepFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ExecutionStarted => "execution.started",
            EventType::ExecutionCompleted => "execution.completed",
            EventType::ExecutionFailed => "execution.failed",
            EventType::StepStarted => "step.started",
            EventType::StepCompleted => "step.completed",
            EventType::StepFailed => "step.failed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type: '{s}'"))
    }
}
