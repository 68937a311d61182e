//! Per-instance lifecycle state machine.
//!
//! Every transition starts from a fresh [`RunState`] probe, so repeating a
//! command converges instead of failing: starting a running instance and
//! stopping a stopped one are no-ops, and stale records are cleared on the
//! way.

use std::ffi::OsString;
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tend_config::Config;
use thiserror::Error;
use tracing::{info, warn};

use crate::LIFECYCLE_TARGET;
use crate::launcher::{LaunchError, Launcher};
use crate::liveness::{LivenessProber, ProbeError, RunState};
use crate::process::{Pid, ProcessControl, Signal, SignalError};
use crate::readiness::{Readiness, ReadinessDetector, ReadinessError, ReadinessPolicy};
use crate::record::{PidRecord, RecordError, remove_record};
use crate::topology::InstanceDescriptor;

/// Deadlines applied while stopping an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// Wait after the termination request before escalating.
    pub graceful_timeout: Duration,
    /// Wait after the forced kill before giving up.
    pub kill_timeout: Duration,
    /// Delay between liveness polls.
    pub poll_interval: Duration,
}

/// Tunables for the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Interpreter that runs entry points.
    pub runtime_binary: OsString,
    /// Early-exit detection window after spawning.
    pub launch_settle: Duration,
    /// Readiness polling bounds.
    pub readiness: ReadinessPolicy,
    /// Termination deadlines.
    pub stop: StopPolicy,
}

impl From<&Config> for LifecycleSettings {
    fn from(config: &Config) -> Self {
        Self {
            runtime_binary: OsString::from(config.runtime_binary()),
            launch_settle: config.launch_settle(),
            readiness: ReadinessPolicy::from(config),
            stop: StopPolicy {
                graceful_timeout: config.stop_timeout(),
                kill_timeout: config.kill_timeout(),
                poll_interval: config.stop_poll_interval(),
            },
        }
    }
}

/// Readiness as reported after a start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessReport {
    /// The instance defines no marker; running is ready.
    NotRequired,
    /// A marker line was observed.
    Confirmed,
    /// No marker appeared in time; the instance is running but unconfirmed.
    Unconfirmed {
        /// Polls performed.
        attempts: u32,
    },
}

impl ReadinessReport {
    /// Whether readiness was left unconfirmed.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Unconfirmed { .. })
    }
}

/// Successful start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The instance was already running; nothing was done.
    AlreadyRunning {
        /// PID of the running process.
        pid: Pid,
    },
    /// A new process was launched.
    Started {
        /// Record written for it.
        record: PidRecord,
        /// Readiness result.
        readiness: ReadinessReport,
        /// Whether a stale record was cleared first.
        recovered_stale: bool,
    },
}

/// Successful stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    NotRunning {
        /// Whether a stale record was removed.
        stale_cleared: bool,
    },
    /// The process terminated and its record was removed.
    Stopped {
        /// PID of the stopped process.
        pid: Pid,
        /// Whether the forced kill was needed.
        forced: bool,
    },
}

/// Successful restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartOutcome {
    /// Stop half.
    pub stop: StopOutcome,
    /// Start half.
    pub start: StartOutcome,
}

/// Phase of the lifecycle in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Resolving or probing state.
    Probe,
    /// Launching the process.
    Start,
    /// Waiting for readiness.
    Readiness,
    /// Terminating the process.
    Stop,
}

impl fmt::Display for Phase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Probe => "probe",
            Self::Start => "start",
            Self::Readiness => "readiness",
            Self::Stop => "stop",
        })
    }
}

/// Errors raised while starting.
#[derive(Debug, Error)]
pub enum StartError {
    /// The current state could not be determined.
    #[error(transparent)]
    Probe(#[from] ProbeError),
    /// A stale record could not be cleared.
    #[error("failed to clear stale pid record: {0}")]
    StaleRecovery(#[source] RecordError),
    /// The process could not be launched.
    #[error(transparent)]
    Launch(#[from] LaunchError),
    /// The log stream could not be read while awaiting readiness.
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    /// The process died before signalling readiness.
    #[error("instance process {pid} exited before becoming ready")]
    ExitedBeforeReady {
        /// PID of the exited process.
        pid: Pid,
    },
}

impl StartError {
    /// Phase in which the error happened.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Probe(_) => Phase::Probe,
            Self::StaleRecovery(_) | Self::Launch(_) => Phase::Start,
            Self::Readiness(_) | Self::ExitedBeforeReady { .. } => Phase::Readiness,
        }
    }
}

/// Errors raised while stopping.
#[derive(Debug, Error)]
pub enum StopError {
    /// The current state could not be determined.
    #[error(transparent)]
    Probe(#[from] ProbeError),
    /// A signal could not be delivered.
    #[error(transparent)]
    Signal(#[from] SignalError),
    /// The process survived both the termination request and the kill.
    #[error("process {pid} did not terminate within {waited:?}")]
    TerminationTimeout {
        /// PID that refused to die.
        pid: Pid,
        /// Total time waited.
        waited: Duration,
    },
    /// The record could not be removed.
    #[error(transparent)]
    Record(#[from] RecordError),
}

impl StopError {
    /// Phase in which the error happened.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Probe(_) => Phase::Probe,
            Self::Signal(_) | Self::TerminationTimeout { .. } | Self::Record(_) => Phase::Stop,
        }
    }
}

/// Errors raised while restarting.
#[derive(Debug, Error)]
pub enum RestartError {
    /// The stop half failed; the start was not attempted.
    #[error(transparent)]
    Stop(#[from] StopError),
    /// The stop half succeeded but the start failed.
    #[error(transparent)]
    Start(#[from] StartError),
}

impl RestartError {
    /// Phase in which the error happened.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Stop(error) => error.phase(),
            Self::Start(error) => error.phase(),
        }
    }
}

/// Drives start, stop and restart for single instances.
#[derive(Debug)]
pub struct Supervisor<'p, P> {
    processes: &'p P,
    settings: LifecycleSettings,
}

impl<'p, P: ProcessControl> Supervisor<'p, P> {
    /// Creates a supervisor over `processes`.
    pub const fn new(processes: &'p P, settings: LifecycleSettings) -> Self {
        Self {
            processes,
            settings,
        }
    }

    /// Current state of `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when the state cannot be determined.
    pub fn probe(&self, descriptor: &InstanceDescriptor) -> Result<RunState, ProbeError> {
        self.prober().probe(descriptor)
    }

    /// Brings `descriptor` to RUNNING.
    ///
    /// A running instance is left alone. A stale record is removed before
    /// launching. When the instance defines readiness markers the call waits
    /// for one; running out of attempts still counts as started, but the
    /// readiness is reported as unconfirmed.
    ///
    /// # Errors
    ///
    /// Returns [`StartError`] when probing, launching or readiness fails.
    pub fn start(&self, descriptor: &InstanceDescriptor) -> Result<StartOutcome, StartError> {
        let recovered_stale = match self.probe(descriptor)? {
            RunState::Running(record) => {
                info!(
                    target: LIFECYCLE_TARGET,
                    instance = %descriptor.id,
                    pid = record.pid,
                    "instance already running"
                );
                return Ok(StartOutcome::AlreadyRunning { pid: record.pid });
            }
            RunState::Stale { pid, reason } => {
                warn!(
                    target: LIFECYCLE_TARGET,
                    instance = %descriptor.id,
                    ?pid,
                    %reason,
                    "clearing stale pid record"
                );
                remove_record(&descriptor.pid_file_path).map_err(StartError::StaleRecovery)?;
                true
            }
            RunState::Stopped => false,
        };

        let launcher = Launcher::new(
            self.processes,
            self.settings.runtime_binary.clone(),
            self.settings.launch_settle,
        );
        let mut launch = launcher.launch(descriptor)?;
        let pid = launch.record.pid;

        let readiness = match &descriptor.readiness {
            None => ReadinessReport::NotRequired,
            Some(markers) => {
                let detector = ReadinessDetector::new(self.settings.readiness);
                // Probe errors count as alive; the attempt bound still applies.
                let outcome = detector.await_ready(&mut launch.cursor, markers, || {
                    !matches!(
                        self.probe(descriptor),
                        Ok(RunState::Stopped | RunState::Stale { .. })
                    )
                })?;
                match outcome {
                    Readiness::Ready { .. } => ReadinessReport::Confirmed,
                    Readiness::TimedOut { attempts } => {
                        warn!(
                            target: LIFECYCLE_TARGET,
                            instance = %descriptor.id,
                            pid,
                            attempts,
                            "readiness not confirmed; instance left running"
                        );
                        ReadinessReport::Unconfirmed { attempts }
                    }
                    Readiness::Exited => return Err(StartError::ExitedBeforeReady { pid }),
                }
            }
        };

        Ok(StartOutcome::Started {
            record: launch.record,
            readiness,
            recovered_stale,
        })
    }

    /// Brings `descriptor` to STOPPED.
    ///
    /// Sends the termination request, escalates to a kill after the graceful
    /// timeout, and removes the record once the process is gone. A stale
    /// record is simply removed. If the process outlives the kill the record
    /// is kept, since the instance may still be running.
    ///
    /// # Errors
    ///
    /// Returns [`StopError`] when probing, signalling or removal fails, or
    /// the process does not terminate.
    pub fn stop(&self, descriptor: &InstanceDescriptor) -> Result<StopOutcome, StopError> {
        let record = match self.probe(descriptor)? {
            RunState::Stopped => {
                return Ok(StopOutcome::NotRunning {
                    stale_cleared: false,
                });
            }
            RunState::Stale { pid, reason } => {
                info!(
                    target: LIFECYCLE_TARGET,
                    instance = %descriptor.id,
                    ?pid,
                    %reason,
                    "removing stale pid record"
                );
                let removed = remove_record(&descriptor.pid_file_path)?;
                return Ok(StopOutcome::NotRunning {
                    stale_cleared: removed,
                });
            }
            RunState::Running(record) => record,
        };

        let pid = record.pid;
        let policy = self.settings.stop;
        let graceful = !self.deliver(pid, Signal::Terminate)?
            || self.wait_for_exit(descriptor, policy.graceful_timeout)?;
        let forced = !graceful;
        if forced {
            warn!(
                target: LIFECYCLE_TARGET,
                instance = %descriptor.id,
                pid,
                timeout_ms = duration_ms(policy.graceful_timeout),
                "graceful stop timed out; killing"
            );
            let killed = !self.deliver(pid, Signal::Kill)?
                || self.wait_for_exit(descriptor, policy.kill_timeout)?;
            if !killed {
                return Err(StopError::TerminationTimeout {
                    pid,
                    waited: policy.graceful_timeout + policy.kill_timeout,
                });
            }
        }

        remove_record(&descriptor.pid_file_path)?;
        info!(
            target: LIFECYCLE_TARGET,
            instance = %descriptor.id,
            pid,
            forced,
            "instance stopped"
        );
        Ok(StopOutcome::Stopped { pid, forced })
    }

    /// Stops then starts `descriptor`; the start is skipped if the stop fails.
    ///
    /// # Errors
    ///
    /// Returns [`RestartError`] naming the half that failed.
    pub fn restart(&self, descriptor: &InstanceDescriptor) -> Result<RestartOutcome, RestartError> {
        let stop = self.stop(descriptor)?;
        let start = self.start(descriptor)?;
        Ok(RestartOutcome { stop, start })
    }

    fn prober(&self) -> LivenessProber<'p, P> {
        LivenessProber::new(self.processes)
    }

    /// Sends `signal`, returning `false` when the process was already gone.
    fn deliver(&self, pid: Pid, signal: Signal) -> Result<bool, StopError> {
        match self.processes.signal(pid, signal) {
            Ok(()) => Ok(true),
            Err(SignalError::NoSuchProcess { .. }) => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    /// Polls until the instance is no longer running or `timeout` passes.
    fn wait_for_exit(
        &self,
        descriptor: &InstanceDescriptor,
        timeout: Duration,
    ) -> Result<bool, StopError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.probe(descriptor)?.is_running() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(self.settings.stop.poll_interval.min(deadline - now));
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
