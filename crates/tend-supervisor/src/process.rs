//! Operating-system process capability.
//!
//! The supervisor never touches processes directly. Spawning, signalling and
//! identity queries go through [`ProcessControl`] so the lifecycle state
//! machine can be driven against a scripted process table in tests.

use std::ffi::OsString;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::topology::InstanceId;

mod system;
#[cfg(unix)]
mod unix;

pub use system::{SystemChild, SystemProcesses};

/// Operating-system process identifier.
pub type Pid = u32;

/// Signals the supervisor sends to instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Polite termination request (`SIGTERM`).
    Terminate,
    /// Forced kill (`SIGKILL`).
    Kill,
}

impl fmt::Display for Signal {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        })
    }
}

/// Identity of a live process.
///
/// `start_token` is the process start time as reported by the kernel. Two
/// processes sharing a PID at different times have different tokens, which
/// is what lets a recycled PID be told apart from the recorded instance.
/// Platforms without a cheap start-time query report `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIdentity {
    /// Kernel start time of the process, when available.
    pub start_token: Option<u64>,
}

/// Result of comparing a recorded PID against the live process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// No process with the PID exists.
    Absent,
    /// A process exists but its identity differs from the recorded one.
    Reused,
    /// A process exists but the record carries no token to compare against
    /// the token the platform reports for it.
    Unverified,
    /// The recorded process is alive.
    Alive,
}

/// Everything needed to spawn one instance.
#[derive(Debug)]
pub struct SpawnRequest {
    /// Instance being launched, for diagnostics.
    pub id: InstanceId,
    /// Runtime binary to execute.
    pub program: OsString,
    /// Arguments passed to the runtime, entry point first.
    pub args: Vec<OsString>,
    /// Working directory of the child.
    pub working_dir: PathBuf,
    /// Environment variables added to the inherited environment.
    pub env: Vec<(String, String)>,
    /// Log file receiving both stdout and stderr.
    pub log: File,
}

/// Exit status observed for a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, absent when the child was killed by a signal.
    pub code: Option<i32>,
}

impl fmt::Display for ExitReport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(formatter, "exit code {code}"),
            None => formatter.write_str("termination by signal"),
        }
    }
}

/// Handle to a freshly spawned child.
pub trait ChildProcess {
    /// PID of the child.
    fn pid(&self) -> Pid;

    /// Checks whether the child has exited without blocking.
    ///
    /// # Errors
    ///
    /// Returns the underlying OS error when the status cannot be queried.
    fn try_wait(&mut self) -> io::Result<Option<ExitReport>>;
}

/// Capability seam over the operating system's process table.
pub trait ProcessControl {
    /// Child handle returned by [`ProcessControl::spawn`].
    type Child: ChildProcess;

    /// Spawns a detached child as described by `request`.
    ///
    /// # Errors
    ///
    /// Returns the OS error raised while spawning.
    fn spawn(&self, request: SpawnRequest) -> io::Result<Self::Child>;

    /// Delivers `signal` to `pid` (and its process group when it leads one).
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::NoSuchProcess`] when the process is gone, or
    /// another variant when delivery fails.
    fn signal(&self, pid: Pid, signal: Signal) -> Result<(), SignalError>;

    /// Looks up the identity of a live process.
    ///
    /// Returns `Ok(None)` when no live process has the PID. Zombies count as
    /// dead.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessQueryError`] when the process table cannot be read.
    fn identity(&self, pid: Pid) -> Result<Option<ProcessIdentity>, ProcessQueryError>;

    /// Compares `pid` against the live process table.
    ///
    /// An `expected` token of `None` is only accepted on platforms that report
    /// no tokens either; elsewhere the process cannot be told apart from an
    /// unrelated one that reused the PID, so it is [`Presence::Unverified`].
    ///
    /// # Errors
    ///
    /// Propagates [`ProcessQueryError`] from [`ProcessControl::identity`].
    fn presence(&self, pid: Pid, expected: Option<u64>) -> Result<Presence, ProcessQueryError> {
        let Some(identity) = self.identity(pid)? else {
            return Ok(Presence::Absent);
        };
        match (expected, identity.start_token) {
            (Some(expected), Some(actual)) if expected != actual => Ok(Presence::Reused),
            (None, Some(_)) => Ok(Presence::Unverified),
            _ => Ok(Presence::Alive),
        }
    }
}

/// Errors raised while delivering a signal.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The process no longer exists.
    #[error("process {pid} does not exist")]
    NoSuchProcess {
        /// Target PID.
        pid: Pid,
    },
    /// The PID cannot be addressed safely.
    #[error("refusing to signal pid {pid}: {reason}")]
    InvalidPid {
        /// Target PID.
        pid: Pid,
        /// Why the PID was rejected.
        reason: &'static str,
    },
    /// Delivery failed for another reason.
    #[error("failed to send {signal} to process {pid}: {source}")]
    Delivery {
        /// Target PID.
        pid: Pid,
        /// Signal that could not be delivered.
        signal: Signal,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The platform offers no way to signal processes.
    #[error("process signalling is not supported on this platform")]
    Unsupported,
}

/// Failure to query the process table.
#[derive(Debug, Error)]
#[error("failed to inspect process {pid}: {source}")]
pub struct ProcessQueryError {
    /// PID being inspected.
    pub pid: Pid,
    /// Underlying OS error.
    #[source]
    pub source: io::Error,
}
