use crate::config::types::{
    FaultConfig, FaultError, PressureTaskConfig, RestartPolicy, Result, Workload,
};
use crate::core::types::{ShutdownCause, SupervisionOutcome, SupervisorState, SupervisorStats};
use crate::kernel::process::{self, ParentWatch, WaitEvent, WorkerExit};
use crate::kernel::signal::{SignalBlockGuard, SignalGate};
use crate::tasks::{ExitOutcome, TaskPlan};
use log::{debug, info, warn};
use nix::sys::signal::Signal;
use nix::unistd::{fork, getpid, ForkResult, Pid};
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

fn to_fork_error(prefix: &str, err: impl std::fmt::Display) -> FaultError {
    FaultError::Fork(format!("{prefix}: {err}"))
}

type ForkFn = unsafe fn() -> nix::Result<ForkResult>;

/// Supervisor decision after a worker exited on its own
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NextStep {
    Restart,
    RestartAfter(Duration),
    Stop { status: i32 },
}

fn next_step(policy: RestartPolicy, exit: WorkerExit) -> NextStep {
    if exit.success() {
        return NextStep::Restart;
    }

    match policy {
        RestartPolicy::Always => NextStep::Restart,
        RestartPolicy::Throttled(delay) => NextStep::RestartAfter(delay),
        RestartPolicy::StopOnFailure => NextStep::Stop {
            status: match exit {
                WorkerExit::Exited(code) => code,
                WorkerExit::Signaled(sig) => 128 + sig as i32,
            },
        },
    }
}

enum Monitor {
    Exited(WorkerExit),
    Shutdown,
}

/// Forks, monitors and restarts one worker at a time until shutdown.
///
/// The loop is `fork -> wait -> reap -> fork ...`. Shutdown can arrive at any
/// point as a gated signal; the handler SIGKILLs the published worker and the
/// loop, once its wait returns, reaps it and stops. Fault state is not touched
/// here: the caller releases it after [`Supervisor::run`] returns.
pub struct Supervisor<'g> {
    gate: &'g SignalGate,
    state: SupervisorState,
    workload: Workload,
    config: FaultConfig,
    stats: SupervisorStats,
    fork: ForkFn,
}

impl<'g> Supervisor<'g> {
    pub fn new(gate: &'g SignalGate, workload: Workload, config: FaultConfig) -> Self {
        Self {
            gate,
            state: SupervisorState::new(getpid()),
            workload,
            config,
            stats: SupervisorStats::default(),
            fork,
        }
    }

    #[cfg(test)]
    fn with_fork(mut self, fork: ForkFn) -> Self {
        self.fork = fork;
        self
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    pub fn stats(&self) -> &SupervisorStats {
        &self.stats
    }

    /// Supervise until shutdown. No worker is alive when this returns,
    /// whatever the result.
    pub fn run(&mut self) -> Result<SupervisionOutcome> {
        info!(
            "Supervising {:?} workers ({}s, {} intensity, restart {:?})",
            self.workload,
            self.config.duration_seconds,
            self.config.intensity,
            self.config.tuning.restart
        );

        // Built once here; every worker inherits it copy-on-write.
        let plan = TaskPlan::prepare(
            self.workload,
            PressureTaskConfig::derive(self.workload, &self.config),
        );
        let result = self.supervise(&plan);

        if let Err(e) = self.terminate_worker() {
            if result.is_ok() {
                return Err(e);
            }
            warn!("Worker termination after failure: {}", e);
        }

        let cause = result?;
        info!(
            "Supervision stopped ({:?}) after {} workers",
            cause, self.stats.workers_started
        );
        Ok(SupervisionOutcome {
            cause,
            stats: self.stats.clone(),
        })
    }

    fn supervise(&mut self, plan: &TaskPlan) -> Result<ShutdownCause> {
        loop {
            let Some(pid) = self.spawn_worker(plan)? else {
                break;
            };

            let exit = match self.monitor(pid)? {
                Monitor::Exited(exit) => exit,
                Monitor::Shutdown => break,
            };

            match next_step(self.config.tuning.restart, exit) {
                NextStep::Restart => debug!("Worker {} exited ({:?}), restarting", pid, exit),
                NextStep::RestartAfter(delay) => {
                    debug!("Worker {} failed ({:?}), restarting in {:?}", pid, exit, delay);
                    if self.gate.wait_for_shutdown(delay) {
                        break;
                    }
                }
                NextStep::Stop { status } => {
                    warn!("Worker {} failed ({:?}), giving up", pid, exit);
                    return Err(FaultError::UnableToMaintainIntensity { status });
                }
            }
        }

        Ok(self
            .gate
            .received_signal()
            .and_then(ShutdownCause::from_signal)
            .unwrap_or(ShutdownCause::Timer))
    }

    /// Fork the next worker.
    ///
    /// Gated signals stay blocked from the latch check until the pid is
    /// published, so a shutdown either prevents the fork or finds the pid.
    /// Returns `None` when shutdown was already requested.
    fn spawn_worker(&mut self, plan: &TaskPlan) -> Result<Option<Pid>> {
        let blocked = SignalBlockGuard::block()?;
        if self.gate.shutdown_requested() {
            return Ok(None);
        }

        // SAFETY: the supervisor is single-threaded; the child only runs the
        // pressure task and exits without returning into the supervisor.
        match unsafe { (self.fork)() }.map_err(|e| to_fork_error("fork(worker)", e))? {
            ForkResult::Child => self.run_worker(plan, blocked),
            ForkResult::Parent { child } => {
                self.state.record_worker(child);
                self.gate.publish_worker(child);
                self.stats.workers_started += 1;
                debug!("Worker {} started", child);
                Ok(Some(child))
            }
        }
    }

    /// Worker side of the fork
    fn run_worker(&self, plan: &TaskPlan, blocked: SignalBlockGuard) -> ! {
        let status = match worker_setup(blocked) {
            Ok(()) => {
                let watch = ParentWatch::new(self.state.parent());
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut task = plan.build();
                    task.run(&watch)
                }));
                match outcome {
                    Ok(outcome) => outcome.status(),
                    Err(_) => ExitOutcome::AllocationFailed.status(),
                }
            }
            Err(e) => {
                debug!("Worker setup failed: {}", e);
                1
            }
        };
        std::process::exit(status);
    }

    /// Block until the worker exits or a signal interrupts the wait.
    fn monitor(&mut self, pid: Pid) -> Result<Monitor> {
        loop {
            match process::wait_exit_unreaped(pid)? {
                WaitEvent::Exited => {
                    let exit = self.reap_worker(pid)?;
                    if self.gate.shutdown_requested() {
                        // The handler may have killed it before the wait.
                        if exit == WorkerExit::Signaled(Signal::SIGKILL) {
                            self.stats.killed_on_shutdown = true;
                        } else {
                            self.stats.record_exit(exit);
                        }
                        return Ok(Monitor::Shutdown);
                    }
                    self.stats.record_exit(exit);
                    return Ok(Monitor::Exited(exit));
                }
                WaitEvent::Interrupted => {
                    if self.gate.shutdown_requested() {
                        return Ok(Monitor::Shutdown);
                    }
                }
            }
        }
    }

    /// Reap an exited worker and retire its handle with gated signals
    /// blocked, so the handler never sees a pid that may be reused.
    fn reap_worker(&mut self, pid: Pid) -> Result<WorkerExit> {
        let _blocked = SignalBlockGuard::block()?;
        let exit = process::reap(pid);
        self.gate.retire_worker();
        self.state.clear_worker();
        exit
    }

    /// Kill and reap the recorded worker, if any.
    fn terminate_worker(&mut self) -> Result<()> {
        let Some(pid) = self.state.worker() else {
            return Ok(());
        };

        process::force_kill(pid)?;
        let exit = self.reap_worker(pid)?;
        self.stats.killed_on_shutdown = true;
        debug!("Worker {} terminated ({:?})", pid, exit);
        Ok(())
    }
}

/// Undo the supervisor's signal setup in a fresh worker.
fn worker_setup(blocked: SignalBlockGuard) -> Result<()> {
    SignalGate::detach_in_worker()?;
    drop(blocked);
    process::setup_parent_death_signal()
}
