//! Sequences lifecycle operations across many instances.
//!
//! Start and stop attempt every target even after one fails, since the
//! instances are independent. Restart is stricter: it asks for confirmation
//! once per operation, then halts at the first failure and reports what
//! state the remaining instances were left in.

use tracing::{info, warn};

use crate::COORDINATOR_TARGET;
use crate::lifecycle::Supervisor;
use crate::process::ProcessControl;
use crate::report::{Operation, OperationReport, Outcome};
use crate::topology::{InstanceDescriptor, Selector};

/// Decides whether an operation may proceed.
#[cfg_attr(test, mockall::automock)]
pub trait Confirm {
    /// Returns `true` to proceed with the operation described by `prompt`.
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// Confirms everything; used for `--yes`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

impl Confirm for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> bool {
        true
    }
}

/// Question asked before restarting the instances addressed by `selector`.
#[must_use]
pub fn restart_prompt(selector: &Selector) -> String {
    if selector.is_all() {
        String::from("Confirm restart of all instances")
    } else {
        format!("Confirm restart of '{selector}'")
    }
}

/// Runs operations over ordered target sets.
#[derive(Debug)]
pub struct Coordinator<'s, 'p, P> {
    supervisor: &'s Supervisor<'p, P>,
}

impl<'s, 'p, P: ProcessControl> Coordinator<'s, 'p, P> {
    /// Creates a coordinator driving `supervisor`.
    pub const fn new(supervisor: &'s Supervisor<'p, P>) -> Self {
        Self { supervisor }
    }

    /// Starts every target in order, continuing past failures.
    #[must_use]
    pub fn start(&self, targets: &[InstanceDescriptor]) -> OperationReport {
        let mut report = OperationReport::new(Operation::Start);
        for descriptor in targets {
            let outcome = match self.supervisor.start(descriptor) {
                Ok(outcome) => Outcome::from_start(outcome),
                Err(error) => {
                    warn!(
                        target: COORDINATOR_TARGET,
                        instance = %descriptor.id,
                        %error,
                        "start failed"
                    );
                    Outcome::failed(error)
                }
            };
            report.push(&descriptor.id, outcome);
        }
        report
    }

    /// Stops every target in order, continuing past failures.
    #[must_use]
    pub fn stop(&self, targets: &[InstanceDescriptor]) -> OperationReport {
        let mut report = OperationReport::new(Operation::Stop);
        for descriptor in targets {
            let outcome = match self.supervisor.stop(descriptor) {
                Ok(outcome) => Outcome::from_stop(outcome),
                Err(error) => {
                    warn!(
                        target: COORDINATOR_TARGET,
                        instance = %descriptor.id,
                        %error,
                        "stop failed"
                    );
                    Outcome::failed(error)
                }
            };
            report.push(&descriptor.id, outcome);
        }
        report
    }

    /// Restarts the targets addressed by `selector` after one confirmation.
    ///
    /// Declining returns a cancelled report without touching any instance.
    /// Otherwise each target is stopped then started in topology order; the
    /// first failure halts the sequence and the remaining targets are
    /// reported as not attempted together with their probed state.
    pub fn restart<C>(
        &self,
        targets: &[InstanceDescriptor],
        selector: &Selector,
        confirm: &mut C,
    ) -> OperationReport
    where
        C: Confirm + ?Sized,
    {
        let mut report = OperationReport::new(Operation::Restart);
        if !confirm.confirm(&restart_prompt(selector)) {
            info!(target: COORDINATOR_TARGET, %selector, "restart cancelled");
            report.cancelled = true;
            for descriptor in targets {
                report.push(&descriptor.id, Outcome::Cancelled);
            }
            return report;
        }

        let mut remaining = targets.iter();
        for descriptor in remaining.by_ref() {
            match self.supervisor.restart(descriptor) {
                Ok(outcome) => report.push(&descriptor.id, Outcome::from_restart(outcome)),
                Err(error) => {
                    warn!(
                        target: COORDINATOR_TARGET,
                        instance = %descriptor.id,
                        %error,
                        "restart failed; halting"
                    );
                    report.push(&descriptor.id, Outcome::failed(error));
                    break;
                }
            }
        }
        for descriptor in remaining {
            let state = self.supervisor.probe(descriptor).ok();
            report.push(&descriptor.id, Outcome::NotAttempted { state });
        }
        report
    }
}
