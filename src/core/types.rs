use crate::kernel::process::WorkerExit;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

/// Parent-side supervision state.
///
/// `worker` is set right after a successful fork and cleared right after the
/// worker is reaped; at most one worker is ever recorded.
#[derive(Debug)]
pub struct SupervisorState {
    worker: Option<Pid>,
    parent: Pid,
}

impl SupervisorState {
    pub fn new(parent: Pid) -> Self {
        Self {
            worker: None,
            parent,
        }
    }

    pub fn worker(&self) -> Option<Pid> {
        self.worker
    }

    /// Pid workers compare their parent against
    pub fn parent(&self) -> Pid {
        self.parent
    }

    pub(crate) fn record_worker(&mut self, pid: Pid) {
        debug_assert!(self.worker.is_none(), "second live worker recorded");
        self.worker = Some(pid);
    }

    pub(crate) fn clear_worker(&mut self) -> Option<Pid> {
        self.worker.take()
    }
}

/// Why supervision ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShutdownCause {
    Timer,
    Interrupt,
    Terminate,
    /// A worker failed under the stop-on-failure policy
    WorkerFailure,
    ForkFailure,
}

impl ShutdownCause {
    pub fn from_signal(signal: Signal) -> Option<Self> {
        match signal {
            Signal::SIGALRM => Some(ShutdownCause::Timer),
            Signal::SIGINT => Some(ShutdownCause::Interrupt),
            Signal::SIGTERM => Some(ShutdownCause::Terminate),
            _ => None,
        }
    }
}

/// Counters kept across worker generations
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStats {
    pub workers_started: u64,
    /// Exited with status 0
    pub workers_completed: u64,
    /// Exited with a non-zero status
    pub workers_failed: u64,
    /// Died from a signal on their own, not from shutdown
    pub workers_signaled: u64,
    /// A live worker was killed by shutdown
    pub killed_on_shutdown: bool,
}

impl SupervisorStats {
    pub(crate) fn record_exit(&mut self, exit: WorkerExit) {
        match exit {
            WorkerExit::Exited(0) => self.workers_completed += 1,
            WorkerExit::Exited(_) => self.workers_failed += 1,
            WorkerExit::Signaled(_) => self.workers_signaled += 1,
        }
    }
}

/// Result of a finished supervision run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisionOutcome {
    pub cause: ShutdownCause,
    pub stats: SupervisorStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_records_one_worker_at_a_time() {
        let mut state = SupervisorState::new(Pid::from_raw(100));
        assert_eq!(state.worker(), None);

        state.record_worker(Pid::from_raw(101));
        assert_eq!(state.worker(), Some(Pid::from_raw(101)));

        assert_eq!(state.clear_worker(), Some(Pid::from_raw(101)));
        assert_eq!(state.worker(), None);
        assert_eq!(state.clear_worker(), None);
        assert_eq!(state.parent(), Pid::from_raw(100));
    }

    #[test]
    fn gated_signals_map_to_causes() {
        assert_eq!(
            ShutdownCause::from_signal(Signal::SIGALRM),
            Some(ShutdownCause::Timer)
        );
        assert_eq!(
            ShutdownCause::from_signal(Signal::SIGINT),
            Some(ShutdownCause::Interrupt)
        );
        assert_eq!(
            ShutdownCause::from_signal(Signal::SIGTERM),
            Some(ShutdownCause::Terminate)
        );
        assert_eq!(ShutdownCause::from_signal(Signal::SIGHUP), None);
    }

    #[test]
    fn exits_are_bucketed_by_status() {
        let mut stats = SupervisorStats::default();
        stats.record_exit(WorkerExit::Exited(0));
        stats.record_exit(WorkerExit::Exited(12));
        stats.record_exit(WorkerExit::Signaled(Signal::SIGSEGV));
        assert_eq!(
            (stats.workers_completed, stats.workers_failed, stats.workers_signaled),
            (1, 1, 1)
        );
    }
}
