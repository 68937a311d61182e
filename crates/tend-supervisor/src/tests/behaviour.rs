//! Behavioural scenarios for multi-instance supervision.

use std::cell::RefCell;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use super::support::{Behaviour, FakeProcesses, Sandbox, fast_settings};
use crate::coordinator::{AutoConfirm, Confirm, Coordinator};
use crate::lifecycle::Supervisor;
use crate::liveness::RunState;
use crate::report::{OperationReport, Outcome};
use crate::status::{StatusEntry, collect_status};
use crate::topology::{InstanceDescriptor, Selector};

struct Decline;

impl Confirm for Decline {
    fn confirm(&mut self, _prompt: &str) -> bool {
        false
    }
}

struct TestWorld {
    sandbox: Sandbox,
    processes: FakeProcesses,
    report: Option<OperationReport>,
    snapshot: Vec<Option<Vec<u8>>>,
}

impl Default for TestWorld {
    fn default() -> Self {
        Self {
            sandbox: Sandbox::new(),
            processes: FakeProcesses::default(),
            report: None,
            snapshot: Vec::new(),
        }
    }
}

impl TestWorld {
    fn targets(&self, selector: &str) -> Vec<InstanceDescriptor> {
        self.sandbox.select(selector)
    }

    fn all_records(&self) -> Vec<Option<Vec<u8>>> {
        self.sandbox
            .resolver()
            .select(&Selector::all())
            .expect("all instances resolve")
            .iter()
            .map(|descriptor| self.sandbox.record_bytes(descriptor))
            .collect()
    }

    fn run(&mut self, verb: &str, selector: &str, decline: bool) {
        let targets = self.targets(selector);
        let supervisor = Supervisor::new(&self.processes, fast_settings());
        let coordinator = Coordinator::new(&supervisor);
        let report = match verb {
            "start" => coordinator.start(&targets),
            "stop" => coordinator.stop(&targets),
            "restart" => {
                let parsed: Selector = selector.parse().expect("valid selector");
                if decline {
                    coordinator.restart(&targets, &parsed, &mut Decline)
                } else {
                    coordinator.restart(&targets, &parsed, &mut AutoConfirm)
                }
            }
            other => panic!("unknown operation {other}"),
        };
        self.report = Some(report);
    }

    fn report(&self) -> &OperationReport {
        self.report.as_ref().expect("an operation ran")
    }

    fn state_of(&self, selector: &str) -> &'static str {
        let targets = self.targets(selector);
        let [entry]: [StatusEntry; 1] = collect_status(&self.processes, &targets)
            .try_into()
            .expect("one status entry");
        entry.state.expect("probe succeeds").label()
    }
}

fn names(list: &str) -> Vec<&str> {
    list.split(',').map(str::trim).collect()
}

#[fixture]
fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::default())
}

#[given("a single-file application \"{app}\"")]
fn given_single_file(world: &RefCell<TestWorld>, app: String) {
    world.borrow().sandbox.single_file_app(&app);
}

#[given("an application \"{app}\" with instances \"{instances}\"")]
fn given_multi_instance(world: &RefCell<TestWorld>, app: String, instances: String) {
    world
        .borrow()
        .sandbox
        .multi_instance_app(&app, &names(&instances), None);
}

#[given("a marker-gated application \"{app}\" with instances \"{instances}\" awaiting \"{marker}\"")]
fn given_awaiting_marker(
    world: &RefCell<TestWorld>,
    app: String,
    instances: String,
    marker: String,
) {
    world
        .borrow()
        .sandbox
        .multi_instance_app(&app, &names(&instances), Some(&marker));
}

#[given("\"{instance}\" cannot be spawned")]
fn given_spawn_failure(world: &RefCell<TestWorld>, instance: String) {
    world
        .borrow()
        .processes
        .script(&instance, Behaviour::SpawnFails);
}

#[given("\"{instance}\" logs \"{line}\" once launched")]
fn given_log_line(world: &RefCell<TestWorld>, instance: String, line: String) {
    world.borrow().processes.logs_on_spawn(&instance, &[&line]);
}

#[given("\"{selector}\" has a record naming a recycled pid")]
fn given_recycled_record(world: &RefCell<TestWorld>, selector: String) {
    let world = world.borrow();
    let descriptor = world.sandbox.descriptor(&selector);
    world.processes.occupy(7777, 1);
    world.sandbox.plant_record(&descriptor, 7777, 2);
}

#[when("the operator runs {verb} on \"{selector}\"")]
fn when_operator_runs(world: &RefCell<TestWorld>, verb: String, selector: String) {
    world.borrow_mut().run(&verb, &selector, false);
}

#[when("the operator declines to restart \"{selector}\"")]
fn when_operator_declines(world: &RefCell<TestWorld>, selector: String) {
    let mut world = world.borrow_mut();
    let snapshot = world.all_records();
    world.snapshot = snapshot;
    world.run("restart", &selector, true);
}

#[when("the process of \"{selector}\" dies unexpectedly")]
fn when_process_dies(world: &RefCell<TestWorld>, selector: String) {
    let world = world.borrow();
    let descriptor = world.sandbox.descriptor(&selector);
    let supervisor = Supervisor::new(&world.processes, fast_settings());
    let state = supervisor.probe(&descriptor).expect("probe succeeds");
    let RunState::Running(record) = state else {
        panic!("{selector} is not running");
    };
    world.processes.crash(record.pid);
}

#[when("\"{instance}\" can no longer be spawned")]
fn when_spawn_breaks(world: &RefCell<TestWorld>, instance: String) {
    world
        .borrow()
        .processes
        .script(&instance, Behaviour::SpawnFails);
}

#[then("\"{selector}\" is {state}")]
fn then_state(world: &RefCell<TestWorld>, selector: String, state: String) {
    assert_eq!(world.borrow().state_of(&selector), state);
}

#[then("{count} processes have been spawned")]
fn then_spawn_count(world: &RefCell<TestWorld>, count: usize) {
    assert_eq!(world.borrow().processes.spawned().len(), count);
}

#[then("processes were spawned in the order \"{order}\"")]
fn then_spawn_order(world: &RefCell<TestWorld>, order: String) {
    assert_eq!(world.borrow().processes.spawn_order(), names(&order));
}

#[then("the operation exits with code {code}")]
fn then_exit_code(world: &RefCell<TestWorld>, code: u8) {
    assert_eq!(world.borrow().report().status().exit_code(), code);
}

#[then("the restart is cancelled")]
fn then_cancelled(world: &RefCell<TestWorld>) {
    let world = world.borrow();
    let report = world.report();
    assert!(report.cancelled);
    assert!(
        report
            .instances
            .iter()
            .all(|instance| matches!(instance.outcome, Outcome::Cancelled))
    );
}

#[then("no pid record has changed")]
fn then_records_unchanged(world: &RefCell<TestWorld>) {
    let world = world.borrow();
    assert_eq!(world.all_records(), world.snapshot);
}

#[then("\"{selector}\" was started after clearing a stale record")]
fn then_recovered(world: &RefCell<TestWorld>, selector: String) {
    let world = world.borrow();
    let id = world.sandbox.descriptor(&selector).id;
    assert!(matches!(
        world.report().outcome(&id),
        Some(Outcome::Started {
            recovered_stale: true,
            ..
        })
    ));
}

#[then("\"{selector}\" was not attempted")]
fn then_not_attempted(world: &RefCell<TestWorld>, selector: String) {
    let world = world.borrow();
    let id = world.sandbox.descriptor(&selector).id;
    assert!(matches!(
        world.report().outcome(&id),
        Some(Outcome::NotAttempted { .. })
    ));
}

#[scenario(path = "tests/features/lifecycle.feature")]
fn lifecycle_behaviour(world: RefCell<TestWorld>) {
    let _ = world;
}
