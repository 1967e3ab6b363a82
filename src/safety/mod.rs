//! Safety and cleanup
//!
//! External fault state is engaged once and released once, on every exit
//! path.

pub mod fault_state;
