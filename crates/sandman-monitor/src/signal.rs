//! Process termination.
//!
//! The monitor never kills directly; it goes through a [`ProcessKiller`]
//! so tests can record kills instead of delivering signals.

use std::io;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Terminates a process that violated its policy.
pub trait ProcessKiller: Send + Sync {
    /// Delivers an uncatchable termination signal to `pid`.
    fn kill(&self, pid: u32) -> io::Result<()>;
}

/// Sends `SIGKILL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalKiller;

impl ProcessKiller for SignalKiller {
    fn kill(&self, pid: u32) -> io::Result<()> {
        // Values above i32::MAX would become process-group targets.
        let raw = i32::try_from(pid).map_err(|_| io::Error::from(Errno::ESRCH))?;
        if raw <= 0 {
            return Err(io::Error::from(Errno::ESRCH));
        }
        kill(Pid::from_raw(raw), Signal::SIGKILL).map_err(io::Error::from)
    }
}

impl<K: ProcessKiller + ?Sized> ProcessKiller for std::sync::Arc<K> {
    fn kill(&self, pid: u32) -> io::Result<()> {
        (**self).kill(pid)
    }
}
