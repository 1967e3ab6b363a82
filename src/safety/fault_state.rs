/// External fault state and its release-once guard
///
/// Some programs leave state outside the process while they run (kernel
/// fault-injection knobs). The supervisor engages that state before the
/// first worker and must release it on every shutdown path, exactly once.
use crate::config::types::{FaultError, Intensity, Result};
use log::{debug, error, info, warn};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default mount point of the fault-injection control tree
pub const DEFAULT_DEBUGFS_ROOT: &str = "/debug";

const PAGE_ALLOC_DIR: &str = "fail_page_alloc";
const PAGE_ALLOC_INTERVAL: i64 = 5;
const PAGE_ALLOC_LOW_PROBABILITY: i64 = 25;
const PAGE_ALLOC_HIGH_PROBABILITY: i64 = 50;
const PAGE_ALLOC_MIN_ORDER: i64 = 0;

/// State outside the process that a fault program toggles
pub trait FaultState {
    fn name(&self) -> &'static str;

    /// Turn the fault on
    fn engage(&mut self) -> Result<()>;

    /// Turn the fault off. Must be safe to call after a partial engage.
    fn release(&mut self) -> Result<()>;
}

/// For programs whose pressure lives entirely in their workers
#[derive(Debug, Default)]
pub struct NoFaultState;

impl FaultState for NoFaultState {
    fn name(&self) -> &'static str {
        "none"
    }

    fn engage(&mut self) -> Result<()> {
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One numeric control file with its engaged value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlSetting {
    pub path: PathBuf,
    pub value: i64,
}

/// A set of numeric control files written in order on engage and reset to
/// their disabled value in `release_order` on release.
#[derive(Clone, Debug)]
pub struct ControlFiles {
    name: &'static str,
    engage: Vec<ControlSetting>,
    release_order: Vec<PathBuf>,
    disabled_value: i64,
}

impl ControlFiles {
    /// Page-allocation failure injection (`fail_page_alloc`) under `root`
    pub fn page_alloc(root: &Path, intensity: Intensity) -> Self {
        let dir = root.join(PAGE_ALLOC_DIR);
        let probability = dir.join("probability");
        let interval = dir.join("interval");
        let times = dir.join("times");
        let min_order = dir.join("min-order");

        let engage = vec![
            ControlSetting {
                path: times.clone(),
                value: -1,
            },
            ControlSetting {
                path: interval.clone(),
                value: PAGE_ALLOC_INTERVAL,
            },
            ControlSetting {
                path: probability.clone(),
                value: intensity.pick(PAGE_ALLOC_LOW_PROBABILITY, PAGE_ALLOC_HIGH_PROBABILITY),
            },
            ControlSetting {
                path: min_order.clone(),
                value: PAGE_ALLOC_MIN_ORDER,
            },
        ];

        Self {
            name: "fail_page_alloc",
            engage,
            // probability first: the fault stops firing before its knobs move
            release_order: vec![probability, times, interval, min_order],
            disabled_value: 0,
        }
    }

    pub fn settings(&self) -> &[ControlSetting] {
        &self.engage
    }

    pub fn release_order(&self) -> &[PathBuf] {
        &self.release_order
    }
}

/// Write a number to an existing control file. Never creates the file, so a
/// missing debugfs mount surfaces as an error instead of a stray file.
fn write_control(path: &Path, value: i64) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|source| FaultError::ControlFile {
            path: path.to_path_buf(),
            source,
        })?;

    file.write_all(value.to_string().as_bytes())
        .map_err(|source| FaultError::ControlFile {
            path: path.to_path_buf(),
            source,
        })?;

    debug!("{} <- {}", path.display(), value);
    Ok(())
}

impl FaultState for ControlFiles {
    fn name(&self) -> &'static str {
        self.name
    }

    fn engage(&mut self) -> Result<()> {
        for setting in &self.engage {
            write_control(&setting.path, setting.value)?;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        // Attempt every file even if one fails, report the first failure.
        let mut first_error = None;
        for path in &self.release_order {
            if let Err(e) = write_control(path, self.disabled_value) {
                warn!("Failed to reset {}: {}", path.display(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Owns the external fault state and releases it at most once
pub struct FaultGuard {
    state: Box<dyn FaultState>,
    engaged: bool,
    released: bool,
}

impl FaultGuard {
    pub fn new(state: Box<dyn FaultState>) -> Self {
        Self {
            state,
            engaged: false,
            released: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.state.name()
    }

    /// Engage the fault. On failure the partially written state is released
    /// before the error is returned.
    pub fn engage(&mut self) -> Result<()> {
        self.engaged = true;
        if let Err(e) = self.state.engage() {
            error!("Failed to engage fault state '{}': {}", self.name(), e);
            self.release();
            return Err(e);
        }
        info!("Fault state '{}' engaged", self.name());
        Ok(())
    }

    /// Release the fault state. Later calls are no-ops.
    /// Returns true if this call performed the release.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;

        if !self.engaged {
            debug!("Fault state '{}' never engaged, nothing to release", self.name());
            return true;
        }

        match self.state.release() {
            Ok(()) => info!("Fault state '{}' released", self.name()),
            Err(e) => error!("Fault state '{}' release incomplete: {}", self.name(), e),
        }
        true
    }

    pub fn released(&self) -> bool {
        self.released
    }
}

impl Drop for FaultGuard {
    fn drop(&mut self) {
        // Covers early returns; the supervisor path releases explicitly.
        self.release();
    }
}
