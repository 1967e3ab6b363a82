//! Pressure tasks
//!
//! The work a forked worker performs. A task runs entirely inside the worker,
//! never forks, and reports how it ended through an [`ExitOutcome`] that the
//! worker turns into its exit status.

pub mod bandwidth;
pub mod burst;
pub mod leak;

use crate::config::types::{PressureTaskConfig, Workload, ALLOCATION_FAILURE_STATUS};
use crate::kernel::process::ParentWatch;
use log::warn;
use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;

pub use bandwidth::BandwidthSaturation;
pub use burst::BurstSpawn;
pub use leak::LeakGrowth;

/// How a pressure task ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Ran its configured rounds
    Completed,
    /// The supervisor is gone; stop instead of pressuring forever
    Orphaned,
    /// The OS refused the pressure buffer
    AllocationFailed,
}

impl ExitOutcome {
    /// Worker exit status
    pub fn status(self) -> i32 {
        match self {
            ExitOutcome::Completed | ExitOutcome::Orphaned => 0,
            ExitOutcome::AllocationFailed => ALLOCATION_FAILURE_STATUS,
        }
    }
}

pub trait PressureTask {
    fn name(&self) -> &'static str;

    /// Apply pressure until done, checking `watch` every round.
    fn run(&mut self, watch: &ParentWatch) -> ExitOutcome;
}

/// Everything a worker needs to build its task, prepared by the supervisor
/// before the first fork so each worker inherits it instead of rebuilding it.
pub struct TaskPlan {
    workload: Workload,
    config: PressureTaskConfig,
    reference: Option<Vec<u8>>,
}

impl TaskPlan {
    /// Size the task and build any shared buffer. A shared buffer that
    /// cannot be allocated is left to the workers, which then fail with the
    /// allocation-failure status.
    pub fn prepare(workload: Workload, config: PressureTaskConfig) -> Self {
        let reference = match workload {
            Workload::LeakGrowth => {
                let pattern = leak::reference_pattern(config.base_size);
                if pattern.is_none() {
                    warn!(
                        "Could not allocate {} byte leak reference, workers will retry",
                        config.base_size
                    );
                }
                pattern
            }
            Workload::BandwidthSaturation | Workload::BurstSpawn => None,
        };

        Self {
            workload,
            config,
            reference,
        }
    }

    pub fn workload(&self) -> Workload {
        self.workload
    }

    /// Build the task in a worker
    pub fn build(&self) -> Box<dyn PressureTask + '_> {
        match self.workload {
            Workload::LeakGrowth => {
                Box::new(LeakGrowth::new(self.config, self.reference.as_deref()))
            }
            Workload::BandwidthSaturation => Box::new(BandwidthSaturation::new(self.config)),
            Workload::BurstSpawn => Box::new(BurstSpawn::new(self.config)),
        }
    }
}

/// Number of rounds to run; unbounded tasks stop only on their own conditions.
fn rounds(config: &PressureTaskConfig) -> u32 {
    config.iterations.unwrap_or(u32::MAX)
}

/// Sleep the configured period plus a random share of the jitter.
fn pause(config: &PressureTaskConfig, rng: &mut StdRng) {
    let jitter_us = config.sleep_jitter.as_micros() as u64;
    let jitter = if jitter_us == 0 {
        Duration::ZERO
    } else {
        Duration::from_micros(rng.gen_range(0..=jitter_us))
    };

    let total = config.sleep_period + jitter;
    if !total.is_zero() {
        std::thread::sleep(total);
    }
}
