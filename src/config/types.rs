/// Core types shared by the fault-injection programs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Exit status a worker uses when it cannot obtain its pressure buffer
pub const ALLOCATION_FAILURE_STATUS: i32 = libc::ENOMEM;

/// Coarse two-level multiplier on resource-pressure magnitude
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Low,
    High,
}

impl Intensity {
    /// Map the optional trailing CLI argument: only `l` selects low intensity.
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some("l") => Intensity::Low,
            _ => Intensity::High,
        }
    }

    /// Select the value matching this intensity
    pub fn pick<T>(self, low: T, high: T) -> T {
        match self {
            Intensity::Low => low,
            Intensity::High => high,
        }
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intensity::Low => write!(f, "low"),
            Intensity::High => write!(f, "high"),
        }
    }
}

/// Work performed by a forked worker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Workload {
    /// Grow-and-touch memory without ever freeing it
    LeakGrowth,
    /// Grow a buffer by self-copy to saturate memory bandwidth
    BandwidthSaturation,
    /// Touch a few pages, sleep briefly and exit
    BurstSpawn,
}

/// What the supervisor does after a worker exits on its own
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    /// Restart immediately regardless of the exit status
    #[default]
    Always,
    /// Restart immediately after success, wait the delay after a failure
    Throttled(Duration),
    /// End supervision the first time a worker reports a failure
    StopOnFailure,
}

/// Optional overrides of the per-workload presets
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tuning {
    /// Fixed sleep between rounds, replaces the preset period and jitter
    pub sleep_override: Option<Duration>,
    /// Bound on task rounds
    pub iterations: Option<u32>,
    pub restart: RestartPolicy,
}

/// Immutable run configuration derived from the command line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaultConfig {
    /// Injection window in seconds, always positive
    pub duration_seconds: u32,
    pub intensity: Intensity,
    pub tuning: Tuning,
}

impl FaultConfig {
    pub fn new(duration_seconds: u32, intensity: Intensity) -> Result<Self> {
        if duration_seconds == 0 {
            return Err(FaultError::Usage(
                "duration must be a positive number of seconds".to_string(),
            ));
        }

        Ok(Self {
            duration_seconds,
            intensity,
            tuning: Tuning::default(),
        })
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }
}

/// Sizing of one worker's pressure task.
///
/// Built inside the forked worker from [`FaultConfig`]; the supervisor never
/// holds one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PressureTaskConfig {
    /// Initial buffer size, in elements of the task's buffer type
    pub base_size: usize,
    /// Elements added per growth round
    pub growth_increment: usize,
    /// Rounds before the task completes, `None` runs until stopped
    pub iterations: Option<u32>,
    pub sleep_period: Duration,
    /// Upper bound of the random extra sleep added to `sleep_period`
    pub sleep_jitter: Duration,
}

impl PressureTaskConfig {
    pub fn derive(workload: Workload, config: &FaultConfig) -> Self {
        let mut task = crate::config::presets::preset(workload, config.intensity);
        if let Some(period) = config.tuning.sleep_override {
            task.sleep_period = period;
            task.sleep_jitter = Duration::ZERO;
        }
        if config.tuning.iterations.is_some() {
            task.iterations = config.tuning.iterations;
        }
        task
    }
}

/// Error type for the supervision engine
#[derive(Error, Debug)]
pub enum FaultError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Fork error: {0}")]
    Fork(String),

    #[error("Wait error: {0}")]
    Wait(String),

    #[error("Signal error: {0}")]
    Signal(String),

    #[error("Control file {}: {source}", .path.display())]
    ControlFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to maintain intensity: worker exited with status {status}")]
    UnableToMaintainIntensity { status: i32 },

    #[error("Report error: {0}")]
    Report(String),
}

impl FaultError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            FaultError::Usage(_) => 2,
            FaultError::UnableToMaintainIntensity { .. } => 3,
            FaultError::ControlFile { .. } => 74,
            FaultError::Fork(_) => 71,
            FaultError::Io(_)
            | FaultError::Wait(_)
            | FaultError::Signal(_)
            | FaultError::Report(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, FaultError>;
