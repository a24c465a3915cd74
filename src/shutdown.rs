//! Graceful-then-forceful termination of a process known only by its pid.
//!
//! The server was started by an earlier invocation, so there is no child handle
//! to wait on and no reliable liveness check: the controller sends SIGTERM,
//! sleeps through the grace period and sends SIGKILL unconditionally.

use std::io;
use std::time::Duration;

use crate::harness_log;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

impl Signal {
    #[cfg(unix)]
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

pub trait SignalSender {
    fn send(&self, pid: i32, signal: Signal) -> io::Result<()>;
}

/// Delivers signals with `kill(2)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsSignals;

#[cfg(unix)]
impl SignalSender for OsSignals {
    fn send(&self, pid: i32, signal: Signal) -> io::Result<()> {
        if pid <= 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to signal pid {pid}"),
            ));
        }
        let result = unsafe { libc::kill(pid, signal.as_raw()) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Graceful,
    WaitGrace,
    Forceful,
    Done(ShutdownOutcome),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// SIGTERM was delivered; SIGKILL followed after the grace period.
    Terminated,
    /// SIGTERM could not be delivered, so the process was presumably gone already.
    NotRunning,
}

pub struct ShutdownController<S> {
    signals: S,
    grace_period: Duration,
}

impl<S: SignalSender> ShutdownController<S> {
    pub fn new(signals: S, grace_period: Duration) -> Self {
        Self {
            signals,
            grace_period,
        }
    }

    pub fn shutdown(&self, pid: i32) -> ShutdownOutcome {
        let mut phase = Phase::Graceful;
        loop {
            phase = match phase {
                Phase::Graceful => match self.signals.send(pid, Signal::Terminate) {
                    Ok(()) => {
                        harness_log::info(module_path!(), format!("sent SIGTERM to pid {pid}"));
                        Phase::WaitGrace
                    }
                    Err(err) => {
                        harness_log::warn(
                            module_path!(),
                            "Server is not running at teardown time!",
                        );
                        harness_log::warn(module_path!(), format!("kill {pid}: {err}"));
                        Phase::Done(ShutdownOutcome::NotRunning)
                    }
                },
                Phase::WaitGrace => {
                    std::thread::sleep(self.grace_period);
                    Phase::Forceful
                }
                Phase::Forceful => {
                    // Usually fails with ESRCH because the server already exited.
                    if self.signals.send(pid, Signal::Kill).is_ok() {
                        harness_log::warn(
                            module_path!(),
                            format!(
                                "Server did not shut down in {:?}! Terminating!",
                                self.grace_period
                            ),
                        );
                    }
                    Phase::Done(ShutdownOutcome::Terminated)
                }
                Phase::Done(outcome) => return outcome,
            };
        }
    }
}
