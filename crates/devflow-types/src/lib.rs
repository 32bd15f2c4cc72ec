//! Shared domain types for devflow.
//!
//! This crate contains the declarative workflow model (steps, connections,
//! triggers, variables), the condition expression AST, execution results,
//! engine lifecycle events, queue entries and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod expression;
pub mod workflow;
