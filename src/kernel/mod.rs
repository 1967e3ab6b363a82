//! Thin wrappers around the Linux primitives the supervisor relies on.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.

pub mod process;
pub mod signal;
pub mod timer;
