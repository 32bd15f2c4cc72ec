//! Connection condition evaluation.
//!
//! `success` and `failure` conditions look only at the upstream step's
//! status. `expression` conditions evaluate an [`Expression`] tree against
//! three bindings:
//!
//! - `step`: the finished upstream step (`step_id`, `status`, `output`,
//!   `error`, `retry_count`, `duration_ms`)
//! - `variables`: execution variables
//! - `stepResults` (alias `step_results`): outputs of all finished steps
//!
//! Evaluation errors never abort an execution. They are logged and the edge
//! is not taken.

use std::cmp::Ordering;

use devflow_types::execution::{StepExecutionResult, StepStatus};
use devflow_types::expression::{CompareOp, Expression};
use devflow_types::workflow::ConnectionCondition;
use serde_json::{Value, json};

use super::context::ExecutionContext;
use super::resolver::navigate_path;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    /// Path rooted at a name that is not bound.
    #[error("unknown binding '{0}' (expected step, variables or stepResults)")]
    UnknownBinding(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("condition did not evaluate to a boolean: got {0}")]
    NotBoolean(Value),
}

// ---------------------------------------------------------------------------
// ConditionEvaluator
// ---------------------------------------------------------------------------

/// Stateless evaluator for connection conditions.
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Whether the edge guarded by `condition` should be taken after `result`.
    pub fn should_follow(
        condition: Option<&ConnectionCondition>,
        result: &StepExecutionResult,
        ctx: &ExecutionContext,
    ) -> bool {
        match condition {
            None => true,
            Some(ConnectionCondition::Success) => result.status == StepStatus::Success,
            Some(ConnectionCondition::Failure) => {
                matches!(result.status, StepStatus::Failure | StepStatus::Skipped)
            }
            Some(ConnectionCondition::Expression { expression }) => {
                let bindings = Self::bindings(result, ctx);
                match Self::evaluate_bool(expression, &bindings) {
                    Ok(follow) => follow,
                    Err(e) => {
                        tracing::warn!(
                            execution_id = %ctx.execution_id,
                            step_id = %result.step_id,
                            error = %e,
                            "condition evaluation failed, edge not taken"
                        );
                        false
                    }
                }
            }
        }
    }

    /// Bindings object for expression evaluation.
    pub fn bindings(result: &StepExecutionResult, ctx: &ExecutionContext) -> Value {
        json!({
            "step": {
                "step_id": result.step_id,
                "status": result.status,
                "output": result.output,
                "error": result.error,
                "retry_count": result.retry_count,
                "duration_ms": result.duration_ms,
            },
            "variables": ctx.variables,
            "stepResults": ctx.step_results,
        })
    }

    /// Evaluate an expression that must produce a boolean.
    pub fn evaluate_bool(expr: &Expression, bindings: &Value) -> Result<bool, ConditionError> {
        match Self::evaluate(expr, bindings)? {
            Value::Bool(b) => Ok(b),
            other => Err(ConditionError::NotBoolean(other)),
        }
    }

    /// Evaluate an expression to a JSON value.
    pub fn evaluate(expr: &Expression, bindings: &Value) -> Result<Value, ConditionError> {
        match expr {
            Expression::Literal { value } => Ok(value.clone()),
            Expression::Path { path } => resolve_path(path, bindings),
            Expression::Exists { path } => Ok(Value::Bool(!resolve_path(path, bindings)?.is_null())),
            Expression::Not { expr } => Ok(Value::Bool(!Self::operand_bool(expr, bindings)?)),
            Expression::And { exprs } => {
                for e in exprs {
                    if !Self::operand_bool(e, bindings)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expression::Or { exprs } => {
                for e in exprs {
                    if Self::operand_bool(e, bindings)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expression::Compare { left, cmp, right } => {
                let l = Self::evaluate(left, bindings)?;
                let r = Self::evaluate(right, bindings)?;
                compare(&l, *cmp, &r).map(Value::Bool)
            }
            Expression::Contains { collection, item } => {
                let c = Self::evaluate(collection, bindings)?;
                let i = Self::evaluate(item, bindings)?;
                contains(&c, &i).map(Value::Bool)
            }
        }
    }

    fn operand_bool(expr: &Expression, bindings: &Value) -> Result<bool, ConditionError> {
        match Self::evaluate(expr, bindings)? {
            Value::Bool(b) => Ok(b),
            other => Err(ConditionError::TypeMismatch(format!(
                "expected boolean operand, got {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolve_path(path: &str, bindings: &Value) -> Result<Value, ConditionError> {
    let mut segments: Vec<&str> = path.split('.').map(str::trim).collect();
    let root = match segments.first().copied() {
        Some("step") | Some("variables") | Some("stepResults") => segments[0],
        Some("step_results") => "stepResults",
        Some(other) => return Err(ConditionError::UnknownBinding(other.to_string())),
        None => return Err(ConditionError::UnknownBinding(String::new())),
    };
    segments[0] = root;
    Ok(navigate_path(bindings, &segments)
        .cloned()
        .unwrap_or(Value::Null))
}

fn compare(left: &Value, cmp: CompareOp, right: &Value) -> Result<bool, ConditionError> {
    let ordering = || {
        let ordering = match (left, right) {
            (Value::Number(a), Value::Number(b)) => {
                let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                a.partial_cmp(&b)
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        };
        ordering.ok_or_else(|| {
            ConditionError::TypeMismatch(format!("cannot order {left} and {right}"))
        })
    };

    match cmp {
        CompareOp::Eq => Ok(loose_eq(left, right)),
        CompareOp::Ne => Ok(!loose_eq(left, right)),
        CompareOp::Gt => Ok(ordering()? == Ordering::Greater),
        CompareOp::Ge => Ok(ordering()? != Ordering::Less),
        CompareOp::Lt => Ok(ordering()? == Ordering::Less),
        CompareOp::Le => Ok(ordering()? != Ordering::Greater),
    }
}

/// JSON equality with numbers compared by value (`1 == 1.0`).
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn contains(collection: &Value, item: &Value) -> Result<bool, ConditionError> {
    match (collection, item) {
        (Value::Null, _) => Ok(false),
        (Value::Array(items), _) => Ok(items.iter().any(|v| loose_eq(v, item))),
        (Value::String(s), Value::String(needle)) => Ok(s.contains(needle.as_str())),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        _ => Err(ConditionError::TypeMismatch(format!(
            "cannot test whether {collection} contains {item}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
