//! Observability
//!
//! Structured run records. Diagnostics go through the `log` facade.

pub mod report;
