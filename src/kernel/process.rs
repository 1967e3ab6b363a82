//! Worker process primitives: fork-side setup, exit observation, reaping and
//! forced termination.
use crate::config::types::{FaultError, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{getppid, Pid};

fn to_wait_error(prefix: &str, err: impl std::fmt::Display) -> FaultError {
    FaultError::Wait(format!("{prefix}: {err}"))
}

/// How a reaped worker ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    Exited(i32),
    Signaled(Signal),
}

impl WorkerExit {
    pub fn success(self) -> bool {
        matches!(self, WorkerExit::Exited(0))
    }
}

/// Result of one blocking wait on the worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitEvent {
    /// The worker has exited and is a zombie awaiting [`reap`]
    Exited,
    /// A signal interrupted the wait
    Interrupted,
}

/// Block until `pid` exits, without reaping it.
///
/// The zombie keeps the pid reserved so the supervisor can retire its handle
/// before the pid becomes reusable.
pub fn wait_exit_unreaped(pid: Pid) -> Result<WaitEvent> {
    // SAFETY: siginfo_t is plain old data and waitid only writes into it.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        libc::waitid(
            libc::P_PID,
            pid.as_raw() as libc::id_t,
            &mut info,
            libc::WEXITED | libc::WNOWAIT,
        )
    };
    if rc == 0 {
        return Ok(WaitEvent::Exited);
    }

    match Errno::last() {
        Errno::EINTR => Ok(WaitEvent::Interrupted),
        e => Err(to_wait_error("waitid(worker)", e)),
    }
}

/// Collect the exit status of `pid`, retrying on EINTR.
pub fn reap(pid: Pid) -> Result<WorkerExit> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(WorkerExit::Exited(code)),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(WorkerExit::Signaled(sig)),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(to_wait_error("waitpid(worker)", e)),
        }
    }
}

/// SIGKILL `pid`. A worker that already exited is not an error.
pub fn force_kill(pid: Pid) -> Result<()> {
    match kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(FaultError::Signal(format!("kill({pid}, SIGKILL): {e}"))),
    }
}

/// Ask the kernel to SIGKILL this process when its parent dies.
pub fn setup_parent_death_signal() -> Result<()> {
    nix::sys::prctl::set_pdeathsig(Signal::SIGKILL)
        .map_err(|e| FaultError::Signal(format!("Failed to set parent death signal: {e}")))?;

    log::debug!("Parent death signal (SIGKILL) configured");
    Ok(())
}

/// Liveness check a worker runs against the supervisor that forked it.
///
/// There is no IPC channel between supervisor and worker, so a changed parent
/// pid is the only evidence the supervisor died without cleaning up.
#[derive(Clone, Copy, Debug)]
pub struct ParentWatch {
    expected: Pid,
}

impl ParentWatch {
    pub fn new(expected: Pid) -> Self {
        Self { expected }
    }

    /// True once the worker has been reparented.
    pub fn orphaned(&self) -> bool {
        getppid() != self.expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn watch_on_real_parent_is_alive() {
        let watch = ParentWatch::new(getppid());
        assert!(!watch.orphaned());
    }

    #[test]
    fn watch_on_other_pid_is_orphaned() {
        let watch = ParentWatch::new(Pid::from_raw(i32::MAX));
        assert!(watch.orphaned());
    }

    #[test]
    fn kill_of_exited_pid_is_tolerated() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        child.wait().unwrap();

        assert!(force_kill(pid).is_ok());
    }

    #[test]
    fn unreaped_wait_then_reap_reports_status() {
        let child = Command::new("sh").args(["-c", "exit 7"]).spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);

        let event = loop {
            match wait_exit_unreaped(pid).unwrap() {
                WaitEvent::Interrupted => continue,
                event => break event,
            }
        };
        assert_eq!(event, WaitEvent::Exited);
        assert_eq!(reap(pid).unwrap(), WorkerExit::Exited(7));
    }

    #[test]
    fn killed_worker_reaps_as_signaled() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);

        force_kill(pid).unwrap();
        let exit = reap(pid).unwrap();
        assert_eq!(exit, WorkerExit::Signaled(Signal::SIGKILL));
        assert!(!exit.success());
    }
}
