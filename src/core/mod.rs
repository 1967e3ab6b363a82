//! Supervision core.
//!
//! Owns the worker process lifecycle: fork, monitor, restart, and the
//! kill-and-reap half of shutdown.

pub mod supervisor;
pub mod types;
