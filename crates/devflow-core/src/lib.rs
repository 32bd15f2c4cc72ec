//! Workflow engine and repository trait definitions for devflow.
//!
//! This crate defines the orchestration logic (engine, queue, resolver,
//! conditions, retry, triggers) and the "ports" (repository and executor
//! traits) that the infrastructure layer implements. It depends only on
//! `devflow-types` -- never on `devflow-infra` or any storage crate.

pub mod event;
pub mod repository;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;
