use super::{pause, rounds, ExitOutcome, PressureTask};
use crate::config::presets::BANDWIDTH_RANDOM_READS;
use crate::config::types::PressureTaskConfig;
use crate::kernel::process::ParentWatch;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

/// Memory bandwidth saturation.
///
/// Starts from `base_size` random `i32` values and, each round, grows the
/// buffer by copying its own head into the new tail. A few random reads per
/// round keep the copy observable.
pub struct BandwidthSaturation {
    config: PressureTaskConfig,
}

impl BandwidthSaturation {
    pub fn new(config: PressureTaskConfig) -> Self {
        Self { config }
    }
}

impl PressureTask for BandwidthSaturation {
    fn name(&self) -> &'static str {
        "bandwidth-saturation"
    }

    fn run(&mut self, watch: &ParentWatch) -> ExitOutcome {
        let mut rng = StdRng::from_entropy();

        let mut buffer: Vec<i32> = Vec::new();
        if buffer.try_reserve_exact(self.config.base_size).is_err() {
            debug!("bandwidth: initial allocation failed");
            return ExitOutcome::AllocationFailed;
        }
        buffer.extend((0..self.config.base_size).map(|_| rng.gen::<i32>()));

        let mut checksum = 0i64;
        for round in 0..rounds(&self.config) {
            // extend_from_within copies from the existing contents only
            let grow = self.config.growth_increment.min(buffer.len());
            if buffer.try_reserve_exact(grow).is_err() {
                debug!("bandwidth: growth failed at round {round}, {} elements", buffer.len());
                return ExitOutcome::AllocationFailed;
            }
            if watch.orphaned() {
                return ExitOutcome::Orphaned;
            }
            buffer.extend_from_within(..grow);

            if !buffer.is_empty() {
                for _ in 0..BANDWIDTH_RANDOM_READS {
                    let index = rng.gen_range(0..buffer.len());
                    checksum = checksum.wrapping_add(i64::from(buffer[index]));
                }
            }
            black_box(checksum);

            pause(&self.config, &mut rng);
        }

        ExitOutcome::Completed
    }
}
