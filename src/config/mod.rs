//! Configuration
//!
//! Run configuration, workload presets and the crate error type.

pub mod presets;
pub mod types;
