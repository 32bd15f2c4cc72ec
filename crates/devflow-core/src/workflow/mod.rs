//! Workflow engine core: definitions, graph execution, admission control and
//! triggers.
//!
//! - `definition` -- YAML/JSON parsing, structural validation, file discovery
//! - `dag` -- petgraph-based cycle detection and reachability
//! - `context` -- per-execution state (variables, step outputs, deadline, cancellation)
//! - `resolver` -- `{{ ... }}` parameter substitution
//! - `condition` -- connection condition and expression evaluation
//! - `retry` -- attempt counting and backoff delays
//! - `step_executor` -- the executor contract and its object-safe wrapper
//! - `registry` -- action type to executor lookup
//! - `engine` -- the orchestrator
//! - `queue` -- priority queue with a concurrency cap, promoted on a tick
//! - `trigger` -- trigger handler contract and trigger manager
//! - `scheduler` -- cron-backed handler for `schedule` triggers

pub mod condition;
pub mod context;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod step_executor;
pub mod trigger;
