use crate::config::types::{FaultConfig, FaultError, Intensity, RestartPolicy, Tuning, Workload};
use crate::core::supervisor::Supervisor;
use crate::core::types::{ShutdownCause, SupervisionOutcome, SupervisorStats};
use crate::kernel::signal::SignalGate;
use crate::kernel::timer::DurationTimer;
use crate::observability::report::ReportBuilder;
use crate::safety::fault_state::{
    ControlFiles, FaultGuard, FaultState, NoFaultState, DEFAULT_DEBUGFS_ROOT,
};
use anyhow::{Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser, ValueEnum};
use log::{error, info, warn};
use nix::unistd::geteuid;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The fault programs built from this crate
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Program {
    /// Controlled memory leak
    Leak,
    /// Memory bandwidth saturation
    Memeater,
    /// Page allocation failures under a burst of short-lived workers
    Pagefail,
}

impl Program {
    pub fn binary(self) -> &'static str {
        match self {
            Self::Leak => "leak",
            Self::Memeater => "memeater",
            Self::Pagefail => "pagefail",
        }
    }

    pub fn workload(self) -> Workload {
        match self {
            Self::Leak => Workload::LeakGrowth,
            Self::Memeater => Workload::BandwidthSaturation,
            Self::Pagefail => Workload::BurstSpawn,
        }
    }

    fn touches_kernel_state(self) -> bool {
        matches!(self, Self::Pagefail)
    }

    fn fault_state(self, debugfs: &Path, intensity: Intensity) -> Box<dyn FaultState> {
        match self {
            Self::Leak | Self::Memeater => Box::new(NoFaultState),
            Self::Pagefail => Box::new(ControlFiles::page_alloc(debugfs, intensity)),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum RestartMode {
    /// Restart every worker immediately
    Always,
    /// Wait --restart-delay-ms after a failed worker
    Throttled,
    /// Stop the run when a worker fails
    StopOnFailure,
}

#[derive(Parser, Debug)]
#[command(version, about = "Timed, signal-cancellable fault injection", long_about = None)]
struct Cli {
    /// Injection window in seconds
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    duration: u32,
    /// `l` selects low intensity; anything else, or nothing, selects high
    intensity: Option<String>,
    /// Ignored, but any extra argument forces high intensity
    #[arg(hide = true)]
    extra: Vec<String>,
    /// Fixed sleep between task rounds, in milliseconds
    #[arg(long, env = "FAULTKIT_SLEEP_MS")]
    sleep_ms: Option<u64>,
    /// Number of task rounds per worker
    #[arg(long, env = "FAULTKIT_ITERATIONS")]
    iterations: Option<u32>,
    /// Restart policy for workers that exit on their own
    #[arg(long, value_enum, default_value_t = RestartMode::Always, env = "FAULTKIT_RESTART")]
    restart: RestartMode,
    /// Delay before restarting a failed worker (throttled policy)
    #[arg(long, default_value_t = 1000, env = "FAULTKIT_RESTART_DELAY_MS")]
    restart_delay_ms: u64,
    /// Write a JSON run report to this path
    #[arg(long, env = "FAULTKIT_REPORT")]
    report: Option<PathBuf>,
    /// Root of the fault-injection control tree (pagefail only)
    #[arg(long, env = "FAULTKIT_DEBUGFS", default_value = DEFAULT_DEBUGFS_ROOT)]
    debugfs: PathBuf,
}

impl Cli {
    fn fault_config(&self) -> crate::config::types::Result<FaultConfig> {
        let restart = match self.restart {
            RestartMode::Always => RestartPolicy::Always,
            RestartMode::Throttled => {
                RestartPolicy::Throttled(Duration::from_millis(self.restart_delay_ms))
            }
            RestartMode::StopOnFailure => RestartPolicy::StopOnFailure,
        };

        let tuning = Tuning {
            sleep_override: self.sleep_ms.map(Duration::from_millis),
            iterations: self.iterations,
            restart,
        };

        Ok(FaultConfig::new(self.duration, self.intensity())?.with_tuning(tuning))
    }

    /// Only an exact `<duration> l` selects low intensity.
    fn intensity(&self) -> Intensity {
        if self.extra.is_empty() {
            Intensity::from_flag(self.intensity.as_deref())
        } else {
            Intensity::High
        }
    }
}

/// Engage the fault state, supervise if that worked, and release the fault
/// state on every path, fork failure included.
fn run_engaged<F>(
    fault: &mut FaultGuard,
    supervise: F,
) -> (crate::config::types::Result<SupervisionOutcome>, SupervisorStats)
where
    F: FnOnce() -> (crate::config::types::Result<SupervisionOutcome>, SupervisorStats),
{
    let result = match fault.engage() {
        Err(e) => (Err(e), SupervisorStats::default()),
        Ok(()) => supervise(),
    };
    fault.release();
    result
}

fn shutdown_cause_of(err: &FaultError) -> Option<ShutdownCause> {
    match err {
        FaultError::Fork(_) => Some(ShutdownCause::ForkFailure),
        FaultError::UnableToMaintainIntensity { .. } => Some(ShutdownCause::WorkerFailure),
        _ => None,
    }
}

pub fn run(program: Program) -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // Usage errors exit here, before anything is started.
    let matches = Cli::command().name(program.binary()).get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());
    let config = cli.fault_config().unwrap_or_else(|e| {
        eprintln!("{}: {}", program.binary(), e);
        std::process::exit(e.exit_code());
    });

    if program.touches_kernel_state() && !geteuid().is_root() {
        warn!(
            "{} may require root privileges to write {}",
            program.binary(),
            cli.debugfs.display()
        );
    }

    let gate = SignalGate::install().context("failed to install shutdown gate")?;
    let mut fault = FaultGuard::new(program.fault_state(&cli.debugfs, config.intensity));
    let report = ReportBuilder::start(
        program.binary(),
        config.duration_seconds,
        config.intensity,
        fault.name(),
    );
    info!("Run {} starting", report.run_id());

    let (outcome, stats) = run_engaged(&mut fault, || {
        let timer = DurationTimer::arm(config.duration_seconds);
        info!("Run {} ends in {}s", report.run_id(), timer.seconds());
        let mut supervisor = Supervisor::new(&gate, program.workload(), config.clone());
        let outcome = supervisor.run();
        (outcome, supervisor.stats().clone())
    });

    let (cause, err) = match &outcome {
        Ok(done) => (Some(done.cause), None),
        Err(e) => (shutdown_cause_of(e), Some(e)),
    };
    if let Some(path) = &cli.report {
        if let Err(e) = report.finish(stats, cause, err).write_to(path) {
            error!("Failed to write run report: {}", e);
        }
    }

    match outcome {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("{} stopped: {}", program.binary(), e);
            eprintln!("{}: {}", program.binary(), e);
            std::process::exit(e.exit_code());
        }
    }
}
