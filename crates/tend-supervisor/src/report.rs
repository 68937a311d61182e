//! Aggregated results of multi-instance operations.

use std::fmt;

use thiserror::Error;

use crate::lifecycle::{
    Phase, ReadinessReport, RestartError, RestartOutcome, StartError, StartOutcome, StopError,
    StopOutcome,
};
use crate::liveness::RunState;
use crate::process::Pid;
use crate::topology::InstanceId;

/// Operation a report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `start`.
    Start,
    /// `stop`.
    Stop,
    /// `restart`.
    Restart,
}

impl fmt::Display for Operation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        })
    }
}

/// Error attached to a failed instance.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// Start failed.
    #[error(transparent)]
    Start(#[from] StartError),
    /// Stop failed.
    #[error(transparent)]
    Stop(#[from] StopError),
    /// Restart failed.
    #[error(transparent)]
    Restart(#[from] RestartError),
}

impl InstanceError {
    /// Phase in which the error happened.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Start(error) => error.phase(),
            Self::Stop(error) => error.phase(),
            Self::Restart(error) => error.phase(),
        }
    }
}

/// What happened to one instance.
#[derive(Debug)]
pub enum Outcome {
    /// A new process was launched.
    Started {
        /// PID of the new process.
        pid: Pid,
        /// Launch time in milliseconds since the epoch.
        launched_at_ms: u64,
        /// Readiness result.
        readiness: ReadinessReport,
        /// Whether a stale record was cleared first.
        recovered_stale: bool,
    },
    /// The instance was already running.
    AlreadyRunning {
        /// PID of the running process.
        pid: Pid,
    },
    /// The process was terminated.
    Stopped {
        /// PID of the terminated process.
        pid: Pid,
        /// Whether the forced kill was needed.
        forced: bool,
    },
    /// Nothing was running.
    NotRunning {
        /// Whether a stale record was removed.
        stale_cleared: bool,
    },
    /// The instance was stopped and started again.
    Restarted {
        /// Stop half.
        stop: StopOutcome,
        /// Start half.
        start: StartOutcome,
    },
    /// The operation failed for this instance.
    Failed {
        /// Phase of the failure.
        phase: Phase,
        /// The failure itself.
        error: InstanceError,
    },
    /// A previous failure halted the operation before this instance.
    NotAttempted {
        /// State observed when the operation halted, if it could be probed.
        state: Option<RunState>,
    },
    /// The operator declined the confirmation.
    Cancelled,
}

impl Outcome {
    pub(crate) fn failed(error: impl Into<InstanceError>) -> Self {
        let error = error.into();
        Self::Failed {
            phase: error.phase(),
            error,
        }
    }

    pub(crate) fn from_start(outcome: StartOutcome) -> Self {
        match outcome {
            StartOutcome::AlreadyRunning { pid } => Self::AlreadyRunning { pid },
            StartOutcome::Started {
                record,
                readiness,
                recovered_stale,
            } => Self::Started {
                pid: record.pid,
                launched_at_ms: record.launched_at_ms,
                readiness,
                recovered_stale,
            },
        }
    }

    pub(crate) const fn from_stop(outcome: StopOutcome) -> Self {
        match outcome {
            StopOutcome::NotRunning { stale_cleared } => Self::NotRunning { stale_cleared },
            StopOutcome::Stopped { pid, forced } => Self::Stopped { pid, forced },
        }
    }

    pub(crate) fn from_restart(outcome: RestartOutcome) -> Self {
        Self::Restarted {
            stop: outcome.stop,
            start: outcome.start,
        }
    }

    /// Whether the instance ended in failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Whether the instance started without confirmed readiness.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        match self {
            Self::Started { readiness, .. }
            | Self::Restarted {
                start: StartOutcome::Started { readiness, .. },
                ..
            } => readiness.is_degraded(),
            _ => false,
        }
    }
}

/// Outcome for one instance.
#[derive(Debug)]
pub struct InstanceReport {
    /// Instance the outcome belongs to.
    pub id: InstanceId,
    /// What happened.
    pub outcome: Outcome,
}

/// Overall classification of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// Every instance reached the requested state.
    Success,
    /// No failures, but at least one readiness was not confirmed.
    Degraded,
    /// At least one instance failed.
    Failed,
}

impl OperationStatus {
    /// Process exit code for the status.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failed => 1,
            Self::Degraded => 2,
        }
    }
}

/// Ordered per-instance outcomes of an operation.
#[derive(Debug)]
pub struct OperationReport {
    /// Operation performed.
    pub operation: Operation,
    /// Whether the operator declined the confirmation.
    pub cancelled: bool,
    /// Outcomes in topology order.
    pub instances: Vec<InstanceReport>,
}

impl OperationReport {
    pub(crate) const fn new(operation: Operation) -> Self {
        Self {
            operation,
            cancelled: false,
            instances: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, id: &InstanceId, outcome: Outcome) {
        self.instances.push(InstanceReport {
            id: id.clone(),
            outcome,
        });
    }

    /// Overall status; a cancelled operation is a success.
    #[must_use]
    pub fn status(&self) -> OperationStatus {
        if self.instances.iter().any(|report| report.outcome.is_failure()) {
            OperationStatus::Failed
        } else if self.instances.iter().any(|report| report.outcome.is_degraded()) {
            OperationStatus::Degraded
        } else {
            OperationStatus::Success
        }
    }

    /// Looks up the outcome for `id`.
    #[must_use]
    pub fn outcome(&self, id: &InstanceId) -> Option<&Outcome> {
        self.instances
            .iter()
            .find(|report| &report.id == id)
            .map(|report| &report.outcome)
    }
}
