//! Classifies an instance as running, stopped or stale.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::LIVENESS_TARGET;
use crate::process::{Pid, Presence, ProcessControl, ProcessQueryError};
use crate::record::{PidRecord, RecordError, RecordState, read_record};
use crate::topology::InstanceDescriptor;

/// Why a record was judged stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// No process has the recorded PID.
    ProcessMissing,
    /// The PID belongs to a different process now.
    PidReused,
    /// The record could not be parsed.
    Unreadable,
    /// The record has no start token, so the live process cannot be verified.
    Unverified,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::ProcessMissing => "process not found",
            Self::PidReused => "pid reused by another process",
            Self::Unreadable => "unreadable pid record",
            Self::Unverified => "pid record cannot verify the process identity",
        })
    }
}

/// Observed state of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// No PID record exists.
    Stopped,
    /// The recorded process is alive.
    Running(PidRecord),
    /// A record exists but does not describe a live instance.
    Stale {
        /// Recorded PID, absent when the record is unreadable.
        pid: Option<Pid>,
        /// Why the record is stale.
        reason: StaleReason,
    },
}

impl RunState {
    /// Whether the state is [`RunState::Running`].
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }

    /// Upper-case state name shown to operators.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Running(_) => "RUNNING",
            Self::Stale { .. } => "STALE",
        }
    }
}

/// Errors raised while probing.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The record could not be read.
    #[error(transparent)]
    Record(#[from] RecordError),
    /// The process table could not be inspected.
    #[error(transparent)]
    Process(#[from] ProcessQueryError),
}

/// Read-only prober combining PID records with the process table.
#[derive(Debug)]
pub struct LivenessProber<'p, P> {
    processes: &'p P,
}

impl<'p, P: ProcessControl> LivenessProber<'p, P> {
    /// Creates a prober over `processes`.
    pub const fn new(processes: &'p P) -> Self {
        Self { processes }
    }

    /// Determines the [`RunState`] of `descriptor`. Never mutates anything.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when the record or the process table cannot be
    /// read.
    pub fn probe(&self, descriptor: &InstanceDescriptor) -> Result<RunState, ProbeError> {
        let state = match read_record(&descriptor.pid_file_path)? {
            RecordState::Missing => RunState::Stopped,
            RecordState::Unreadable { reason } => {
                debug!(
                    target: LIVENESS_TARGET,
                    instance = %descriptor.id,
                    %reason,
                    "pid record is unreadable"
                );
                RunState::Stale {
                    pid: None,
                    reason: StaleReason::Unreadable,
                }
            }
            RecordState::Present(record) => self.classify(record)?,
        };
        Ok(state)
    }

    fn classify(&self, record: PidRecord) -> Result<RunState, ProbeError> {
        let state = match self.processes.presence(record.pid, record.start_token)? {
            Presence::Alive => RunState::Running(record),
            Presence::Absent => RunState::Stale {
                pid: Some(record.pid),
                reason: StaleReason::ProcessMissing,
            },
            Presence::Reused => RunState::Stale {
                pid: Some(record.pid),
                reason: StaleReason::PidReused,
            },
            Presence::Unverified => RunState::Stale {
                pid: Some(record.pid),
                reason: StaleReason::Unverified,
            },
        };
        Ok(state)
    }
}
