//! `{{ ... }}` placeholder substitution in step parameters.
//!
//! Supported references:
//! - `{{ variables.<name>[.<path>] }}`
//! - `{{ steps.<step_id>[.<path>] }}`
//! - `{{ trigger.<path> }}` (into the trigger payload)
//!
//! Numeric path segments index arrays. References that cannot be resolved
//! are left verbatim.

use devflow_types::workflow::WorkflowStep;
use serde_json::Value;

use super::context::ExecutionContext;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Stateless resolver for step parameters.
pub struct ParameterResolver;

impl ParameterResolver {
    /// Copy of `step` with every string parameter resolved.
    pub fn resolve_step(step: &WorkflowStep, ctx: &ExecutionContext) -> WorkflowStep {
        let mut resolved = step.clone();
        resolved.action.parameters = Self::resolve_value(&step.action.parameters, ctx);
        resolved
    }

    /// Resolve placeholders in every string reachable from `value`.
    pub fn resolve_value(value: &Value, ctx: &ExecutionContext) -> Value {
        match value {
            Value::String(s) => Self::resolve_str(s, ctx),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| Self::resolve_value(v, ctx)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::resolve_value(v, ctx)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Resolve one string.
    ///
    /// A string that is exactly one resolvable placeholder yields the
    /// referenced value with its JSON type. Otherwise each placeholder is
    /// replaced by its string form.
    pub fn resolve_str(input: &str, ctx: &ExecutionContext) -> Value {
        if let Some(expr) = single_placeholder(input) {
            if let Some(value) = Self::lookup(expr, ctx) {
                return value;
            }
        }

        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find(OPEN) {
            let after_open = &rest[start + OPEN.len()..];
            let Some(end) = after_open.find(CLOSE) else {
                break;
            };
            out.push_str(&rest[..start]);
            let expr = after_open[..end].trim();
            match Self::lookup(expr, ctx) {
                Some(value) => out.push_str(&value_to_string(&value)),
                None => out.push_str(&rest[start..start + OPEN.len() + end + CLOSE.len()]),
            }
            rest = &after_open[end + CLOSE.len()..];
        }
        out.push_str(rest);
        Value::String(out)
    }

    /// Look up a dotted reference such as `steps.build.output.files.0`.
    pub fn lookup(expr: &str, ctx: &ExecutionContext) -> Option<Value> {
        let mut segments = expr.split('.').map(str::trim);
        let root = segments.next()?;
        let path: Vec<&str> = segments.collect();

        match root {
            "variables" => {
                let (name, rest) = path.split_first()?;
                navigate_path(ctx.variables.get(*name)?, rest).cloned()
            }
            "steps" => {
                let (step_id, rest) = path.split_first()?;
                navigate_path(ctx.step_result(step_id)?, rest).cloned()
            }
            "trigger" => navigate_path(ctx.trigger.payload.as_ref()?, &path).cloned(),
            _ => None,
        }
    }
}

/// Walk `path` into `value`. Numeric segments index arrays.
pub fn navigate_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Display form of a value when embedded in a larger string.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

/// The inner expression when `input` is exactly one `{{ ... }}` placeholder.
fn single_placeholder(input: &str) -> Option<&str> {
    let inner = input
        .trim()
        .strip_prefix(OPEN)?
        .strip_suffix(CLOSE)?;
    if inner.contains(OPEN) || inner.contains(CLOSE) {
        return None;
    }
    Some(inner.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{step, workflow};
    use devflow_types::execution::TriggerEvent;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> ExecutionContext {
        let wf = workflow(vec![step("build", &[], &[])]);
        let trigger = TriggerEvent::new(
            "file_change",
            "src/",
            Some(json!({"path": "src/main.rs", "changes": [{"kind": "modify"}]})),
        );
        let mut ctx = ExecutionContext::new(Uuid::now_v7(), &wf, trigger);
        ctx.variables.insert("name".to_string(), json!("X"));
        ctx.variables.insert("retries".to_string(), json!(3));
        ctx.variables
            .insert("repo".to_string(), json!({"owner": "acme", "tags": ["a", "b"]}));
        ctx.set_step_result("build", json!({"files": ["a.rs", "b.rs"], "ok": true}))
            .unwrap();
        ctx
    }

    // -----------------------------------------------------------------------
    // Strings
    // -----------------------------------------------------------------------

    #[test]
    fn test_embedded_variable() {
        assert_eq!(
            ParameterResolver::resolve_str("hello {{variables.name}}", &ctx()),
            json!("hello X")
        );
    }

    #[test]
    fn test_whitespace_tolerated() {
        assert_eq!(
            ParameterResolver::resolve_str("hello {{   variables.name }}!", &ctx()),
            json!("hello X!")
        );
    }

    #[test]
    fn test_unknown_reference_left_verbatim() {
        let ctx = ctx();
        assert_eq!(
            ParameterResolver::resolve_str("{{bogus.path}}", &ctx),
            json!("{{bogus.path}}")
        );
        assert_eq!(
            ParameterResolver::resolve_str("a {{ steps.nope.x }} b {{variables.name}}", &ctx),
            json!("a {{ steps.nope.x }} b X")
        );
    }

    #[test]
    fn test_unclosed_placeholder_left_verbatim() {
        assert_eq!(
            ParameterResolver::resolve_str("x {{variables.name", &ctx()),
            json!("x {{variables.name")
        );
    }

    #[test]
    fn test_single_placeholder_keeps_type() {
        let ctx = ctx();
        assert_eq!(
            ParameterResolver::resolve_str("{{ variables.retries }}", &ctx),
            json!(3)
        );
        assert_eq!(
            ParameterResolver::resolve_str("{{steps.build.files}}", &ctx),
            json!(["a.rs", "b.rs"])
        );
    }

    #[test]
    fn test_embedded_non_string_is_json() {
        assert_eq!(
            ParameterResolver::resolve_str("files: {{steps.build.files}}", &ctx()),
            json!(r#"files: ["a.rs","b.rs"]"#)
        );
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    #[test]
    fn test_array_index_paths() {
        let ctx = ctx();
        assert_eq!(
            ParameterResolver::lookup("steps.build.files.1", &ctx),
            Some(json!("b.rs"))
        );
        assert_eq!(
            ParameterResolver::lookup("variables.repo.tags.0", &ctx),
            Some(json!("a"))
        );
        assert_eq!(ParameterResolver::lookup("steps.build.files.9", &ctx), None);
    }

    #[test]
    fn test_trigger_payload() {
        let ctx = ctx();
        assert_eq!(
            ParameterResolver::lookup("trigger.path", &ctx),
            Some(json!("src/main.rs"))
        );
        assert_eq!(
            ParameterResolver::lookup("trigger.changes.0.kind", &ctx),
            Some(json!("modify"))
        );
    }

    // -----------------------------------------------------------------------
    // Structured values
    // -----------------------------------------------------------------------

    #[test]
    fn test_resolve_nested_parameters() {
        let ctx = ctx();
        let params = json!({
            "command": "cargo test -p {{variables.name}}",
            "args": ["{{variables.retries}}", 7, null],
            "env": {"OWNER": "{{variables.repo.owner}}"}
        });
        let resolved = ParameterResolver::resolve_value(&params, &ctx);
        assert_eq!(
            resolved,
            json!({
                "command": "cargo test -p X",
                "args": [3, 7, null],
                "env": {"OWNER": "acme"}
            })
        );
    }

    #[test]
    fn test_resolve_step_leaves_original_untouched() {
        let ctx = ctx();
        let mut original = step("notify", &["build"], &[]);
        original.action.parameters = json!({"message": "built by {{variables.name}}"});

        let resolved = ParameterResolver::resolve_step(&original, &ctx);
        assert_eq!(resolved.action.parameters["message"], json!("built by X"));
        assert_eq!(
            original.action.parameters["message"],
            json!("built by {{variables.name}}")
        );
    }
}
