//! Instance lifecycle supervision for `tend`.
//!
//! Nothing here keeps state between invocations: every command re-derives
//! the topology from the application layout and the run state from PID
//! records plus the live process table. The crate is organised bottom-up:
//!
//! - [`topology`] resolves applications into ordered instance descriptors.
//! - [`process`] is the operating-system seam used for spawning and signals.
//! - [`record`] persists PID records atomically.
//! - [`launcher`], [`liveness`] and [`readiness`] implement one step each.
//! - [`lifecycle`] is the per-instance start/stop/restart state machine.
//! - [`coordinator`] sequences operations across instances.
//! - [`status`] aggregates read-only probes.

pub mod coordinator;
pub mod launcher;
pub mod lifecycle;
pub mod liveness;
pub mod process;
pub mod readiness;
pub mod record;
pub mod report;
pub mod status;
pub mod topology;


pub use coordinator::{AutoConfirm, Confirm, Coordinator, restart_prompt};
pub use launcher::{LaunchError, Launcher};
pub use lifecycle::{
    LifecycleSettings, Phase, ReadinessReport, RestartError, StartError, StartOutcome,
    StopError, StopOutcome, StopPolicy, Supervisor,
};
pub use liveness::{LivenessProber, ProbeError, RunState, StaleReason};
pub use process::{ProcessControl, Signal, SystemProcesses};
pub use readiness::ReadinessPolicy;
pub use record::PidRecord;
pub use report::{InstanceReport, Operation, OperationReport, OperationStatus, Outcome};
pub use status::{ConsoleState, StatusEntry, collect_status};
pub use topology::{
    Application, InstanceDescriptor, InstanceId, ResolverSettings, Selector, SelectorError,
    TopologyError, TopologyResolver,
};

const PROCESS_TARGET: &str = concat!(module_path!(), "::process");
const RECORD_TARGET: &str = concat!(module_path!(), "::record");
const TOPOLOGY_TARGET: &str = concat!(module_path!(), "::topology");
const LAUNCHER_TARGET: &str = concat!(module_path!(), "::launcher");
const LIVENESS_TARGET: &str = concat!(module_path!(), "::liveness");
const READINESS_TARGET: &str = concat!(module_path!(), "::readiness");
const LIFECYCLE_TARGET: &str = concat!(module_path!(), "::lifecycle");
const COORDINATOR_TARGET: &str = concat!(module_path!(), "::coordinator");
