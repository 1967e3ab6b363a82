/// Workload presets
///
/// Each workload has a fixed sizing for low and high intensity. The numbers
/// are the ones the experiment datasets were labelled with, so changing them
/// changes the anomaly signature.
use crate::config::types::{Intensity, PressureTaskConfig, Workload};
use std::time::Duration;

const MIB: usize = 1024 * 1024;

/// Leak chunk unit, in bytes
pub const LEAK_CHUNK_BASE: usize = 10 * MIB;
pub const LEAK_LOW_MULTIPLIER: usize = 4;
pub const LEAK_HIGH_MULTIPLIER: usize = 16;
pub const LEAK_SLEEP: Duration = Duration::from_secs(2);

/// Bandwidth buffer unit, in `i32` elements
pub const BANDWIDTH_BASE: usize = 18 * MIB;
pub const BANDWIDTH_LOW_MULTIPLIER: usize = 1;
pub const BANDWIDTH_HIGH_MULTIPLIER: usize = 2;
pub const BANDWIDTH_ITERATIONS: u32 = 10;
pub const BANDWIDTH_SLEEP: Duration = Duration::from_secs(2);
/// Random reads per growth round
pub const BANDWIDTH_RANDOM_READS: usize = 10;

/// Burst buffer, in bytes
pub const BURST_BUFFER: usize = 128 * 1024;
pub const BURST_SLEEP: Duration = Duration::from_millis(10);
pub const BURST_JITTER: Duration = Duration::from_millis(40);

/// Preset sizing for a workload at the given intensity
pub fn preset(workload: Workload, intensity: Intensity) -> PressureTaskConfig {
    match workload {
        Workload::LeakGrowth => {
            let size =
                LEAK_CHUNK_BASE * intensity.pick(LEAK_LOW_MULTIPLIER, LEAK_HIGH_MULTIPLIER);
            PressureTaskConfig {
                base_size: size,
                growth_increment: size,
                iterations: None,
                sleep_period: LEAK_SLEEP,
                sleep_jitter: Duration::ZERO,
            }
        }
        Workload::BandwidthSaturation => {
            let size = BANDWIDTH_BASE
                * intensity.pick(BANDWIDTH_LOW_MULTIPLIER, BANDWIDTH_HIGH_MULTIPLIER);
            PressureTaskConfig {
                base_size: size,
                growth_increment: size,
                iterations: Some(BANDWIDTH_ITERATIONS),
                sleep_period: BANDWIDTH_SLEEP,
                sleep_jitter: Duration::ZERO,
            }
        }
        // Burst intensity is carried by the page-alloc fault probability.
        Workload::BurstSpawn => PressureTaskConfig {
            base_size: BURST_BUFFER,
            growth_increment: 0,
            iterations: Some(1),
            sleep_period: BURST_SLEEP,
            sleep_jitter: BURST_JITTER,
        },
    }
}
