//! Condition expression AST.
//!
//! Connection conditions are written as a small tagged tree rather than as
//! source text, so workflow documents never carry executable code. Paths are
//! dot-separated and rooted at one of the bound names (`step`, `variables`,
//! `stepResults`); numeric segments index into arrays.
//!
//! ```yaml
//! condition:
//!   type: expression
//!   expression:
//!     op: compare
//!     left: { op: path, path: step.output.issues }
//!     cmp: gt
//!     right: { op: literal, value: 0 }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A boolean-valued (or value-producing) expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expression {
    /// A constant JSON value.
    Literal { value: Value },
    /// The value at a bound path (`null` when absent).
    Path { path: String },
    /// `true` when the path resolves to a non-null value.
    Exists { path: String },
    Not { expr: Box<Expression> },
    /// `true` when every operand is `true` (and for an empty list).
    And { exprs: Vec<Expression> },
    /// `true` when any operand is `true`.
    Or { exprs: Vec<Expression> },
    Compare {
        left: Box<Expression>,
        cmp: CompareOp,
        right: Box<Expression>,
    },
    /// Array membership, substring match, or object key presence.
    Contains {
        collection: Box<Expression>,
        item: Box<Expression>,
    },
}

/// Comparison operator for [`Expression::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Expression {
    /// Shorthand for a literal node.
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal {
            value: value.into(),
        }
    }

    /// Shorthand for a path node.
    pub fn path(path: impl Into<String>) -> Self {
        Expression::Path { path: path.into() }
    }

    /// Shorthand for a comparison node.
    pub fn compare(left: Expression, cmp: CompareOp, right: Expression) -> Self {
        Expression::Compare {
            left: Box::new(left),
            cmp,
            right: Box::new(right),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_nested_expression() {
        let expr: Expression = serde_json::from_value(json!({
            "op": "and",
            "exprs": [
                { "op": "exists", "path": "step.output" },
                {
                    "op": "compare",
                    "left": { "op": "path", "path": "variables.env" },
                    "cmp": "eq",
                    "right": { "op": "literal", "value": "prod" }
                }
            ]
        }))
        .unwrap();

        let expected = Expression::And {
            exprs: vec![
                Expression::Exists {
                    path: "step.output".to_string(),
                },
                Expression::compare(
                    Expression::path("variables.env"),
                    CompareOp::Eq,
                    Expression::literal("prod"),
                ),
            ],
        };
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let result: Result<Expression, _> =
            serde_json::from_value(json!({ "op": "eval", "code": "1 + 1" }));
        assert!(result.is_err());
    }
}
