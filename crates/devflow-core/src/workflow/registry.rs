//! Executor registry for runtime action-type lookup.
//!
//! A name-indexed registry of boxed step executors. Built once at startup
//! and shared with the engine as `Arc<ExecutorRegistry>`.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use super::step_executor::{BoxStepExecutor, StepExecutor};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("an executor is already registered for action type '{0}'")]
    Duplicate(String),
}

/// Registry of step executors, indexed by action type.
#[derive(Debug, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, BoxStepExecutor>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for `action_type`. Each type may be registered
    /// once.
    pub fn register<T: StepExecutor + 'static>(
        &mut self,
        action_type: impl Into<String>,
        executor: T,
    ) -> Result<(), RegistryError> {
        let action_type = action_type.into();
        if self.executors.contains_key(&action_type) {
            return Err(RegistryError::Duplicate(action_type));
        }
        tracing::debug!(action_type = %action_type, "registered step executor");
        self.executors
            .insert(action_type, BoxStepExecutor::new(executor));
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<T: StepExecutor + 'static>(
        mut self,
        action_type: impl Into<String>,
        executor: T,
    ) -> Result<Self, RegistryError> {
        self.register(action_type, executor)?;
        Ok(self)
    }

    pub fn get(&self, action_type: &str) -> Option<&BoxStepExecutor> {
        self.executors.get(action_type)
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.executors.contains_key(action_type)
    }

    /// Registered action types, sorted.
    pub fn action_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Parameter schema of every registered executor, keyed by action type.
    pub fn schemas(&self) -> BTreeMap<&str, Value> {
        self.executors
            .iter()
            .map(|(k, v)| (k.as_str(), v.parameter_schema()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
