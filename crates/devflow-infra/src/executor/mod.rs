//! Utility step executors.
//!
//! - `echo` -- returns its resolved parameters; `fail: true` makes it fail
//! - `delay` -- sleeps for `duration_ms`, stopping early on cancellation

pub mod delay;
pub mod echo;

use devflow_core::workflow::registry::{ExecutorRegistry, RegistryError};
use serde_json::Value;

pub use delay::DelayExecutor;
pub use echo::EchoExecutor;

/// A registry with every utility executor registered under its action type.
pub fn builtin_registry() -> Result<ExecutorRegistry, RegistryError> {
    ExecutorRegistry::new()
        .with(echo::ACTION_TYPE, EchoExecutor)?
        .with(delay::ACTION_TYPE, DelayExecutor)
}

/// Whether `value` is a string that will only be known after resolution.
pub(crate) fn is_placeholder(value: &Value) -> bool {
    value.as_str().is_some_and(|s| s.contains("{{"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_has_both_executors() {
        let registry = builtin_registry().unwrap();
        assert_eq!(registry.action_types(), vec!["delay", "echo"]);
        let schemas = registry.schemas();
        assert!(schemas["delay"]["properties"]["duration_ms"].is_object());
        assert!(schemas["echo"]["properties"]["fail"].is_object());
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder(&Value::from("{{ variables.fail }}")));
        assert!(!is_placeholder(&Value::from("plain")));
        assert!(!is_placeholder(&Value::from(true)));
    }
}
