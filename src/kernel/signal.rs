//! Async-safe shutdown gate
//!
//! SIGINT, SIGTERM and SIGALRM all mean "begin shutdown". The handler trips a
//! single-transition latch and, on the first delivery only, SIGKILLs the
//! worker pid published by the supervisor. Everything else (reaping, fault
//! state release, logging) runs in the supervisor loop after its blocking
//! wait returns.
use crate::config::types::{FaultError, Result};
use log::{debug, info};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::{Duration, Instant};

/// Signals that request shutdown
pub const GATED_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGALRM];

/// Single-writer, single-transition shutdown flag
pub struct ShutdownLatch {
    requested: AtomicBool,
    signal: AtomicI32,
}

impl ShutdownLatch {
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            signal: AtomicI32::new(0),
        }
    }

    /// Move the latch to `shutdown`.
    /// Returns true only for the call that performed the transition.
    pub fn trip(&self, signal: i32) -> bool {
        if self
            .requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.signal.store(signal, Ordering::SeqCst);
        true
    }

    pub fn is_set(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Signal number that tripped the latch
    pub fn signal(&self) -> Option<i32> {
        match self.signal.load(Ordering::SeqCst) {
            0 => None,
            sig => Some(sig),
        }
    }
}

impl Default for ShutdownLatch {
    fn default() -> Self {
        Self::new()
    }
}

static LATCH: ShutdownLatch = ShutdownLatch::new();

/// Pid of the live worker, 0 when none. Read by the handler.
static WORKER_PID: AtomicI32 = AtomicI32::new(0);

/// Handler for every gated signal.
/// Only atomics and kill(2): no allocation, no locks, no buffered I/O.
extern "C" fn on_shutdown_signal(signal: libc::c_int) {
    // SAFETY: errno is thread-local; restoring it keeps an interrupted
    // syscall's error intact for the code that resumes after the handler.
    let saved_errno = unsafe { *libc::__errno_location() };

    if LATCH.trip(signal) {
        let worker = WORKER_PID.load(Ordering::SeqCst);
        if worker > 0 {
            // SAFETY: kill(2) is async-signal-safe.
            unsafe {
                libc::kill(worker, libc::SIGKILL);
            }
        }
    }

    unsafe {
        *libc::__errno_location() = saved_errno;
    }
}

fn gated_set() -> SigSet {
    let mut mask = SigSet::empty();
    for sig in GATED_SIGNALS {
        mask.add(sig);
    }
    mask
}

/// Process-wide shutdown gate
pub struct SignalGate {
    _private: (),
}

impl SignalGate {
    /// Install handlers for every gated signal.
    ///
    /// Must be called before the duration timer is armed and before the
    /// first worker is forked. Handlers are installed without `SA_RESTART`
    /// so the supervisor's blocking wait returns `EINTR`.
    pub fn install() -> Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(on_shutdown_signal),
            SaFlags::empty(),
            gated_set(),
        );

        for sig in GATED_SIGNALS {
            // SAFETY: the handler only touches atomics and calls kill(2).
            unsafe { signal::sigaction(sig, &action) }
                .map_err(|e| FaultError::Signal(format!("sigaction({sig}): {e}")))?;
        }

        info!("Shutdown gate installed (SIGINT, SIGTERM, SIGALRM)");
        Ok(Self { _private: () })
    }

    pub fn shutdown_requested(&self) -> bool {
        LATCH.is_set()
    }

    /// Signal that tripped the latch, if any
    pub fn received_signal(&self) -> Option<Signal> {
        LATCH.signal().and_then(|sig| Signal::try_from(sig).ok())
    }

    /// Make `pid` the handler's kill target.
    /// Call with gated signals blocked, right after fork.
    pub fn publish_worker(&self, pid: Pid) {
        WORKER_PID.store(pid.as_raw(), Ordering::SeqCst);
    }

    /// Clear the kill target. Call with gated signals blocked, before reaping.
    pub fn retire_worker(&self) {
        WORKER_PID.store(0, Ordering::SeqCst);
    }

    pub fn published_worker(&self) -> Option<Pid> {
        match WORKER_PID.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(Pid::from_raw(pid)),
        }
    }

    /// Sleep up to `timeout`, returning early once shutdown is requested.
    /// Returns true if shutdown was requested.
    pub fn wait_for_shutdown(&self, timeout: Duration) -> bool {
        let start = Instant::now();

        while start.elapsed() < timeout {
            if self.shutdown_requested() {
                return true;
            }
            let remaining = timeout.saturating_sub(start.elapsed());
            std::thread::sleep(remaining.min(Duration::from_millis(10)));
        }

        self.shutdown_requested()
    }

    /// Restore default dispositions in a freshly forked worker.
    /// The worker has no business running the supervisor's handler.
    pub fn detach_in_worker() -> Result<()> {
        for sig in GATED_SIGNALS {
            // SAFETY: SIG_DFL installs no Rust code.
            unsafe { signal::signal(sig, SigHandler::SigDfl) }
                .map_err(|e| FaultError::Signal(format!("signal({sig}, SIG_DFL): {e}")))?;
        }
        debug!("Worker signal dispositions reset");
        Ok(())
    }
}

/// Blocks the gated signals for a critical section.
/// The previous mask is restored on drop.
pub struct SignalBlockGuard {
    previous: SigSet,
}

impl SignalBlockGuard {
    pub fn block() -> Result<Self> {
        let mut previous = SigSet::empty();
        signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&gated_set()), Some(&mut previous))
            .map_err(|e| FaultError::Signal(format!("Failed to block signals: {e}")))?;

        Ok(Self { previous })
    }
}

impl Drop for SignalBlockGuard {
    fn drop(&mut self) {
        let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
    }
}
