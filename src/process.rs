//! Process identity and liveness probing.
//!
//! Owners of both lock tiers are processes. Remote owners are identified by
//! PID plus a start time (PIDs alone are reused); local markers carry bare
//! PIDs and are judged with a zero-signal probe.

use crate::error::{LockError, Result};
use chrono::Local;
use std::fmt;
use tracing::{debug, error, warn};

/// Format used for owner start times: local time to the second.
pub const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A process that can own a share of a remote lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub process_id: u32,
    pub start_time: String,
}

impl ProcessIdentity {
    /// Identity of the calling process, stamped with the current time.
    pub fn current() -> Self {
        Self::new(std::process::id(), Local::now().format(START_TIME_FORMAT).to_string())
    }

    pub fn new(process_id: u32, start_time: impl Into<String>) -> Self {
        Self {
            process_id,
            start_time: start_time.into(),
        }
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (started {})", self.process_id, self.start_time)
    }
}

/// Outcome of probing a PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
}

/// Answers whether a process still exists.
pub trait ProcessProbe: Send + Sync + fmt::Debug {
    fn probe(&self, pid: i32) -> Result<Liveness>;
}

/// Zero-signal probe: `kill(pid, 0)`.
///
/// Success or `EPERM` (the process belongs to another user) means alive;
/// only `ESRCH` means dead.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalProbe;

#[cfg(unix)]
impl ProcessProbe for SignalProbe {
    fn probe(&self, pid: i32) -> Result<Liveness> {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // kill() with pid <= 0 addresses process groups, not a process.
        if pid <= 0 {
            return Err(LockError::UserError(format!("invalid PID {}", pid)));
        }
        match kill(Pid::from_raw(pid), None) {
            Ok(()) => Ok(Liveness::Alive),
            Err(Errno::EPERM) => Ok(Liveness::Alive),
            Err(Errno::ESRCH) => Ok(Liveness::Dead),
            Err(e) => Err(LockError::Io(format!("failed to probe process {}: {}", pid, e))),
        }
    }
}

#[cfg(not(unix))]
impl ProcessProbe for SignalProbe {
    fn probe(&self, _pid: i32) -> Result<Liveness> {
        Ok(Liveness::Alive)
    }
}

/// Judge one PID entry read from a marker file.
///
/// Anything that cannot prove death counts as alive: malformed entries are
/// logged as errors, probe failures as warnings.
pub fn entry_is_alive(probe: &dyn ProcessProbe, entry: &str) -> bool {
    let entry = entry.trim();
    let pid = match entry.parse::<i32>() {
        Ok(pid) if pid > 0 => pid,
        _ => {
            error!("encountered non-integer PID value: {:?}", entry);
            return true;
        }
    };
    match probe.probe(pid) {
        Ok(Liveness::Alive) => true,
        Ok(Liveness::Dead) => false,
        Err(e) => {
            warn!("cannot determine liveness of process {}: {}", pid, e);
            true
        }
    }
}

/// True if every entry is provably dead. An empty set counts as dead.
pub fn all_dead<'a, I>(probe: &dyn ProcessProbe, entries: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    for entry in entries {
        if entry_is_alive(probe, entry) {
            debug!("found fresh lock process {}", entry.trim());
            return false;
        }
        debug!("found stale lock process {}", entry.trim());
    }
    true
}
