//! One-shot injection deadline delivered as SIGALRM.
use log::info;
use nix::unistd::alarm;

/// Armed deadline for the current process.
///
/// Expiry raises SIGALRM, which the shutdown gate treats exactly like an
/// interrupt. Forked workers do not inherit pending alarms, and process exit
/// cancels it, so there is no cancel path.
#[derive(Debug)]
pub struct DurationTimer {
    seconds: u32,
}

impl DurationTimer {
    /// Arm the deadline, replacing any previous one.
    /// `seconds` is positive; zero would disarm instead.
    pub fn arm(seconds: u32) -> Self {
        debug_assert!(seconds > 0, "a zero alarm cancels instead of arming");
        if let Some(left) = alarm::set(seconds) {
            info!("Replaced pending deadline ({left}s left)");
        }
        info!("Injection deadline armed: {seconds}s");
        Self { seconds }
    }

    pub fn seconds(&self) -> u32 {
        self.seconds
    }
}
