//! Workflow definition parsing, structural validation, and filesystem
//! operations.
//!
//! Converts between YAML/JSON documents and the `Workflow` model, checks
//! structural constraints that do not depend on which executors are
//! registered, and discovers workflow files on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use devflow_types::error::RepositoryError;
use devflow_types::execution::ValidationReport;
use devflow_types::workflow::{TriggerKind, Workflow};
use thiserror::Error;
use uuid::Uuid;

use super::dag;
use super::scheduler::validate_schedule;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised when loading, validating or starting a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural or executor validation failure.
    #[error("invalid workflow: {}", .0.join("; "))]
    Invalid(Vec<String>),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Input dependencies contain a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    #[error("workflow {0} not found")]
    NotFound(Uuid),

    #[error("workflow {0} is disabled")]
    Disabled(Uuid),

    /// The per-workflow concurrency limit is exhausted.
    #[error("concurrency limit reached for workflow {0}")]
    ConcurrencyLimitReached(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    /// Runtime failure while driving an execution.
    #[error("execution error: {0}")]
    ExecutionError(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML document into a structurally valid `Workflow`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<Workflow, WorkflowError> {
    let workflow: Workflow =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    ensure_valid(workflow)
}

/// Parse a JSON document into a structurally valid `Workflow`.
pub fn parse_workflow_json(json: &str) -> Result<Workflow, WorkflowError> {
    let workflow: Workflow =
        serde_json::from_str(json).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    ensure_valid(workflow)
}

/// Serialize a `Workflow` to YAML.
pub fn serialize_workflow_yaml(workflow: &Workflow) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(workflow).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

fn ensure_valid(workflow: Workflow) -> Result<Workflow, WorkflowError> {
    let report = validate_structure(&workflow);
    if report.valid {
        Ok(workflow)
    } else {
        Err(WorkflowError::Invalid(report.errors))
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate everything that does not depend on registered executors.
///
/// Errors:
/// - empty name, duplicate step / trigger / variable names
/// - inputs or output targets naming unknown steps, self connections
/// - steps present but none of them a root
/// - cycles among input dependencies
/// - zero attempts, zero timeouts, zero concurrency
/// - unparseable schedule triggers
///
/// Warnings: no steps, unreachable steps, variable defaults of the wrong
/// type, initial retry delay above the maximum, duplicate connections.
pub fn validate_structure(workflow: &Workflow) -> ValidationReport {
    let mut report = ValidationReport::new();

    if workflow.name.trim().is_empty() {
        report.error("workflow name must not be empty");
    }

    if workflow.steps.is_empty() {
        report.warning("workflow has no steps");
    }

    let mut seen_ids = HashSet::new();
    for step in &workflow.steps {
        if step.id.trim().is_empty() {
            report.error("step ID must not be empty");
        }
        if !seen_ids.insert(step.id.as_str()) {
            report.error(format!("duplicate step ID: '{}'", step.id));
        }
    }

    for step in &workflow.steps {
        for input in &step.connections.inputs {
            if !seen_ids.contains(input.as_str()) {
                report.error(format!(
                    "step '{}' has unknown input '{}'",
                    step.id, input
                ));
            }
        }

        let mut targets = HashSet::new();
        for conn in &step.connections.outputs {
            let target = conn.target_step_id.as_str();
            if target == step.id {
                report.error(format!("step '{}' connects to itself", step.id));
            } else if !seen_ids.contains(target) {
                report.error(format!(
                    "step '{}' connects to unknown step '{}'",
                    step.id, target
                ));
            }
            if !targets.insert(target) {
                report.warning(format!(
                    "step '{}' has more than one connection to '{}'",
                    step.id, target
                ));
            }
        }

        if step.timeout_ms == Some(0) {
            report.error(format!("step '{}' timeout must be > 0", step.id));
        }

        if let Some(policy) = &step.retry_policy {
            if policy.max_attempts == 0 {
                report.error(format!(
                    "step '{}' retry policy must allow at least one attempt",
                    step.id
                ));
            }
            if policy.initial_delay_ms > policy.max_delay_ms {
                report.warning(format!(
                    "step '{}' initial retry delay exceeds max delay; every delay is clamped to {} ms",
                    step.id, policy.max_delay_ms
                ));
            }
        }
    }

    if !workflow.steps.is_empty() && workflow.root_steps().next().is_none() {
        report.error("workflow has no root step (every step has inputs)");
    }

    if let Err(e) = dag::check_input_cycles(&workflow.steps) {
        report.error(e.to_string());
    }

    for unreachable in dag::unreachable_steps(workflow) {
        if workflow.root_steps().next().is_some() {
            report.warning(format!(
                "step '{unreachable}' is not reachable from any root step"
            ));
        }
    }

    if workflow.settings.timeout_ms == Some(0) {
        report.error("settings.timeout_ms must be > 0");
    }
    if workflow.settings.concurrency == Some(0) {
        report.error("settings.concurrency must be >= 1");
    }

    let mut var_names = HashSet::new();
    for var in &workflow.variables {
        if !var_names.insert(var.name.as_str()) {
            report.error(format!("duplicate variable: '{}'", var.name));
        }
        if let Some(default) = &var.default {
            if !var.var_type.accepts(default) {
                report.warning(format!(
                    "variable '{}' default does not match declared type {:?}",
                    var.name, var.var_type
                ));
            }
        }
    }

    let mut trigger_ids = HashSet::new();
    for trigger in &workflow.triggers {
        if !trigger_ids.insert(trigger.id.as_str()) {
            report.error(format!("duplicate trigger ID: '{}'", trigger.id));
        }
        if let TriggerKind::Schedule { cron } = &trigger.kind {
            if let Err(e) = validate_schedule(cron) {
                report.error(format!("trigger '{}': {e}", trigger.id));
            }
        }
    }

    report
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow from a `.yaml`, `.yml` or `.json` file.
pub fn load_workflow_file(path: &Path) -> Result<Workflow, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_workflow_json(&content),
        _ => parse_workflow_yaml(&content),
    }
}

/// Save a workflow as YAML, creating parent directories.
pub fn save_workflow_file(path: &Path, workflow: &Workflow) -> Result<(), WorkflowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_workflow_yaml(workflow)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover all workflow documents under `base_dir`, recursively.
///
/// Files that fail to parse are logged and skipped.
pub fn discover_workflows(base_dir: &Path) -> Result<Vec<(PathBuf, Workflow)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, Workflow)>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
            continue;
        }
        let is_workflow = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| matches!(ext, "yaml" | "yml" | "json"));
        if !is_workflow {
            continue;
        }
        match load_workflow_file(&path) {
            Ok(workflow) => results.push((path, workflow)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unparseable workflow file");
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{step, workflow};
    use devflow_types::workflow::{RetryPolicy, VariableType, WorkflowTrigger, WorkflowVariable};
    use serde_json::json;

    const LINT_WORKFLOW: &str = r#"
id: "01938e90-0000-7000-8000-0000000000aa"
name: lint-on-save
triggers:
  - id: save
    type: file_change
    paths: [src]
steps:
  - id: lint
    action:
      type: shell
      parameters:
        command: "cargo clippy"
    connections:
      outputs:
        - target_step_id: report
  - id: report
    action: { type: notification }
    connections:
      inputs: [lint]
"#;

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_yaml() {
        let wf = parse_workflow_yaml(LINT_WORKFLOW).unwrap();
        assert_eq!(wf.name, "lint-on-save");
        assert_eq!(wf.steps.len(), 2);
        assert_eq!(wf.triggers[0].kind.name(), "file_change");
    }

    #[test]
    fn test_parse_yaml_rejects_invalid_structure() {
        let yaml = r#"
id: "01938e90-0000-7000-8000-0000000000ab"
name: broken
steps:
  - id: a
    action: { type: shell }
    connections:
      inputs: [missing]
"#;
        let err = parse_workflow_yaml(yaml).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown input 'missing'"), "{msg}");
        assert!(msg.contains("no root step"), "{msg}");
    }

    #[test]
    fn test_parse_json_malformed() {
        let err = parse_workflow_json("{ not json").unwrap_err();
        assert!(matches!(err, WorkflowError::ParseError(_)));
    }

    // -----------------------------------------------------------------------
    // Structural validation
    // -----------------------------------------------------------------------

    #[test]
    fn test_valid_chain_has_no_errors() {
        let wf = workflow(vec![step("a", &[], &["b"]), step("b", &["a"], &[])]);
        let report = validate_structure(&wf);
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_empty_workflow_is_valid_with_warning() {
        let wf = workflow(vec![]);
        let report = validate_structure(&wf);
        assert!(report.valid);
        assert_eq!(report.warnings, vec!["workflow has no steps"]);
    }

    #[test]
    fn test_duplicate_step_ids() {
        let wf = workflow(vec![step("a", &[], &[]), step("a", &[], &[])]);
        let report = validate_structure(&wf);
        assert!(report.errors.iter().any(|e| e.contains("duplicate step ID")));
    }

    #[test]
    fn test_no_root_step_is_error() {
        let wf = workflow(vec![step("a", &["b"], &[]), step("b", &["a"], &[])]);
        let report = validate_structure(&wf);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("no root step")));
        assert!(report.errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn test_unknown_and_self_connections() {
        let wf = workflow(vec![step("a", &[], &["a", "ghost"])]);
        let report = validate_structure(&wf);
        assert!(report.errors.iter().any(|e| e.contains("connects to itself")));
        assert!(report.errors.iter().any(|e| e.contains("unknown step 'ghost'")));
    }

    #[test]
    fn test_unreachable_step_warning() {
        let wf = workflow(vec![step("a", &[], &[]), step("b", &["a"], &[])]);
        let report = validate_structure(&wf);
        assert!(report.valid);
        assert!(report.warnings.iter().any(|w| w.contains("'b' is not reachable")));
    }

    #[test]
    fn test_zero_attempts_and_delay_warning() {
        let mut a = step("a", &[], &[]);
        a.retry_policy = Some(RetryPolicy {
            max_attempts: 0,
            initial_delay_ms: 5_000,
            max_delay_ms: 1_000,
            ..RetryPolicy::default()
        });
        let report = validate_structure(&workflow(vec![a]));
        assert!(report.errors.iter().any(|e| e.contains("at least one attempt")));
        assert!(report.warnings.iter().any(|w| w.contains("clamped")));
    }

    #[test]
    fn test_variable_and_trigger_checks() {
        let mut wf = workflow(vec![step("a", &[], &[])]);
        wf.variables = vec![
            WorkflowVariable {
                name: "retries".to_string(),
                var_type: VariableType::Number,
                default: Some(json!("three")),
                description: None,
            },
            WorkflowVariable {
                name: "retries".to_string(),
                var_type: VariableType::Number,
                default: None,
                description: None,
            },
        ];
        wf.triggers = vec![WorkflowTrigger {
            id: "cron".to_string(),
            enabled: true,
            kind: TriggerKind::Schedule {
                cron: "whenever you like".to_string(),
            },
        }];

        let report = validate_structure(&wf);
        assert!(report.errors.iter().any(|e| e.contains("duplicate variable")));
        assert!(report.errors.iter().any(|e| e.contains("trigger 'cron'")));
        assert!(report.warnings.iter().any(|w| w.contains("declared type")));
    }

    // -----------------------------------------------------------------------
    // Filesystem
    // -----------------------------------------------------------------------

    #[test]
    fn test_save_and_discover() {
        let tmp = tempfile::TempDir::new().unwrap();
        let wf = parse_workflow_yaml(LINT_WORKFLOW).unwrap();
        save_workflow_file(&tmp.path().join("nested/lint.yaml"), &wf).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "not a workflow").unwrap();
        std::fs::write(tmp.path().join("broken.yml"), "name: [").unwrap();

        let found = discover_workflows(tmp.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.id, wf.id);
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        let found = discover_workflows(Path::new("/definitely/not/here")).unwrap();
        assert!(found.is_empty());
    }
}
