//! Infrastructure layer for devflow.
//!
//! Contains implementations of the ports defined in `devflow-core`: an
//! in-memory workflow repository fed from workflow files on disk, the
//! `devflow.toml` loader, and the utility step executors (`echo`, `delay`).

pub mod config;
pub mod executor;
pub mod memory;
