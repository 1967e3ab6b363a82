//! faultkit: timed, signal-cancellable fault injection
//!
//! Each program degrades one resource for a bounded window so that monitoring
//! and diagnosis pipelines have ground truth to train and evaluate against.
//! The programs share one supervision engine: a parent forks a pressure
//! worker, restarts it whenever it exits, and on timeout or SIGINT/SIGTERM
//! kills and reaps the worker and releases any external fault state.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::signal`]: Shutdown gate (async-safe latch, signal blocking)
//! - [`kernel::timer`]: One-shot injection deadline
//! - [`kernel::process`]: Exit observation, reaping, forced kill, parent watch
//!
//! ## Supervision ([`core`])
//! - [`core::supervisor`]: Fork / monitor / restart loop and shutdown
//! - [`core::types`]: Supervisor state, shutdown causes, counters
//!
//! ## Pressure Tasks ([`tasks`])
//! - [`tasks::leak`]: Never-freed memory growth
//! - [`tasks::bandwidth`]: Self-copy buffer growth
//! - [`tasks::burst`]: Short-lived page touchers
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::fault_state`]: External fault state, released exactly once
//!
//! ## Observability ([`observability`])
//! - [`observability::report`]: JSON run report for labelling
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Run configuration and error type
//! - [`config::presets`]: Per-workload sizing
//!
//! # Design Principles
//!
//! 1. **Handlers only flip atomics** - the one permitted syscall is kill(2)
//! 2. **Handles never go stale** - the worker pid is published and retired
//!    with shutdown signals blocked
//! 3. **Workers watch their parent** - no worker outlives its supervisor
//! 4. **Release exactly once** - external fault state is reset on every path

// Kernel Primitives
pub mod kernel;

// Supervision
pub mod core;

// Pressure Tasks
pub mod tasks;

// Safety & Cleanup
pub mod safety;

// Observability
pub mod observability;

// Configuration
pub mod config;

// CLI entrypoint wiring shared by the fault binaries.
pub mod cli;

pub use config::types::*;
