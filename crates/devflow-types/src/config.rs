//! Engine configuration types.
//!
//! `EngineConfig` is the top-level `devflow.toml`. Every field has a default,
//! so an empty file (or no file) yields a working engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Runtime limits and defaults for the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cap on simultaneously running queued executions.
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,

    /// Interval between queue promotion passes.
    #[serde(default = "default_queue_tick_ms")]
    pub queue_tick_ms: u64,

    /// Entries kept in each of the completed/failed queue histories.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Per-attempt step timeout when a step does not set one.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,

    /// Execution deadline when neither the workflow nor the caller sets one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_workflow_timeout_ms: Option<u64>,

    /// Broadcast channel capacity for engine events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Directory scanned for workflow documents by `devflow watch`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_dir: Option<PathBuf>,

    /// Cap on the total serialized size of step outputs held by one
    /// execution. No cap when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_bytes: Option<usize>,
}

fn default_max_concurrent_executions() -> usize {
    5
}

fn default_queue_tick_ms() -> u64 {
    1_000
}

fn default_history_limit() -> usize {
    100
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: default_max_concurrent_executions(),
            queue_tick_ms: default_queue_tick_ms(),
            history_limit: default_history_limit(),
            default_step_timeout_ms: default_step_timeout_ms(),
            default_workflow_timeout_ms: None,
            event_capacity: default_event_capacity(),
            workflow_dir: None,
            max_context_bytes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_executions, 5);
        assert_eq!(config.queue_tick_ms, 1_000);
        assert_eq!(config.history_limit, 100);
        assert_eq!(config.default_step_timeout_ms, 30_000);
        assert!(config.default_workflow_timeout_ms.is_none());
        assert!(config.workflow_dir.is_none());
        assert!(config.max_context_bytes.is_none());
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_concurrent_executions, 5);
        assert_eq!(config.event_capacity, 1024);
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
max_concurrent_executions = 2
queue_tick_ms = 250
max_context_bytes = 52428800
default_workflow_timeout_ms = 600000
workflow_dir = "/home/dev/.devflow/workflows"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_concurrent_executions, 2);
        assert_eq!(config.queue_tick_ms, 250);
        assert_eq!(config.default_workflow_timeout_ms, Some(600_000));
        assert_eq!(
            config.workflow_dir.as_deref(),
            Some(std::path::Path::new("/home/dev/.devflow/workflows"))
        );
        assert_eq!(config.history_limit, 100);
        assert_eq!(config.max_context_bytes, Some(52_428_800));
    }
}
