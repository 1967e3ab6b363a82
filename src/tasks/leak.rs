use super::{pause, rounds, ExitOutcome, PressureTask};
use crate::config::types::PressureTaskConfig;
use crate::kernel::process::ParentWatch;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;

const PATTERN_PERIOD: usize = 26;

/// Controlled memory leak.
///
/// Every round allocates a fresh `base_size` byte chunk, copies the reference
/// pattern into it so the pages are really resident, and never frees it.
/// The pattern is normally built once by the supervisor and shared with every
/// worker copy-on-write; without one the worker builds its own.
pub struct LeakGrowth<'a> {
    config: PressureTaskConfig,
    reference: Option<&'a [u8]>,
}

impl<'a> LeakGrowth<'a> {
    pub fn new(config: PressureTaskConfig, reference: Option<&'a [u8]>) -> Self {
        Self { config, reference }
    }
}

/// `len` bytes of `(i + 57) % 26`.
///
/// One period is computed, then the buffer doubles by copying its own head,
/// which keeps every copy aligned to the period.
pub fn reference_pattern(len: usize) -> Option<Vec<u8>> {
    let mut pattern = Vec::new();
    pattern.try_reserve_exact(len).ok()?;
    pattern.extend((0..len.min(PATTERN_PERIOD)).map(|i| ((i + 57) % PATTERN_PERIOD) as u8));
    while pattern.len() < len {
        let copy = pattern.len().min(len - pattern.len());
        pattern.extend_from_within(..copy);
    }
    Some(pattern)
}

impl PressureTask for LeakGrowth<'_> {
    fn name(&self) -> &'static str {
        "leak-growth"
    }

    fn run(&mut self, watch: &ParentWatch) -> ExitOutcome {
        let built;
        let reference = match self.reference {
            Some(shared) if shared.len() == self.config.base_size => shared,
            _ => match reference_pattern(self.config.base_size) {
                Some(pattern) => {
                    built = pattern;
                    &built[..]
                }
                None => {
                    debug!("leak: reference pattern allocation failed");
                    return ExitOutcome::AllocationFailed;
                }
            },
        };
        let mut rng = StdRng::from_entropy();
        let mut leaked = 0usize;

        for _ in 0..rounds(&self.config) {
            if watch.orphaned() {
                return ExitOutcome::Orphaned;
            }

            let mut chunk: Vec<u8> = Vec::new();
            if chunk.try_reserve_exact(reference.len()).is_err() {
                debug!("leak: allocation failed after {leaked} bytes");
                return ExitOutcome::AllocationFailed;
            }
            chunk.extend_from_slice(reference);
            leaked += chunk.len();
            let _ = chunk.leak();

            pause(&self.config, &mut rng);
        }

        ExitOutcome::Completed
    }
}
