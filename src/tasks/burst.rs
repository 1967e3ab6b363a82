use super::{pause, rounds, ExitOutcome, PressureTask};
use crate::config::types::PressureTaskConfig;
use crate::kernel::process::ParentWatch;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::hint::black_box;

const TOUCH_BYTE: u8 = 0xA5;

/// Short-lived page toucher.
///
/// Meant to be forked over and over while a page-allocation fault
/// probability is active: every worker faults in a fresh small buffer, sleeps
/// briefly and exits.
pub struct BurstSpawn {
    config: PressureTaskConfig,
}

impl BurstSpawn {
    pub fn new(config: PressureTaskConfig) -> Self {
        Self { config }
    }
}

impl PressureTask for BurstSpawn {
    fn name(&self) -> &'static str {
        "burst-spawn"
    }

    fn run(&mut self, watch: &ParentWatch) -> ExitOutcome {
        let mut rng = StdRng::from_entropy();

        for _ in 0..rounds(&self.config) {
            if watch.orphaned() {
                return ExitOutcome::Orphaned;
            }

            let mut pages: Vec<u8> = Vec::new();
            if pages.try_reserve_exact(self.config.base_size).is_err() {
                return ExitOutcome::AllocationFailed;
            }
            pages.resize(self.config.base_size, TOUCH_BYTE);
            black_box(&pages);

            pause(&self.config, &mut rng);
        }

        ExitOutcome::Completed
    }
}
