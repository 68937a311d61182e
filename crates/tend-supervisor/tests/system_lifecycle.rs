//! End-to-end lifecycle against real processes, using `sh` as the runtime.
#![cfg(unix)]

use std::fs;
use std::path::Path;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use tend_config::{Config, StatePaths};
use tend_supervisor::{
    AutoConfirm, Coordinator, LifecycleSettings, OperationStatus, Outcome, ReadinessReport,
    ResolverSettings, RunState, Selector, StartOutcome, StopOutcome, Supervisor, SystemProcesses,
    TopologyResolver, collect_status,
};

const LAYOUT: &str = r#"
[defaults]
ready_markers = ["^ready$"]

[[instance]]
name = "alpha"

[[instance]]
name = "beta"
"#;

const ENTRY_POINT: &str = "echo \"booting $TEND_INSTANCE_NAME\"\necho ready\nexec sleep 30\n";

struct Deployment {
    root: TempDir,
    config: Config,
}

impl Deployment {
    fn resolver(&self) -> TopologyResolver {
        TopologyResolver::new(
            ResolverSettings::from(&self.config),
            StatePaths::resolve(&self.config, self.root.path()),
        )
    }

    fn settings(&self) -> LifecycleSettings {
        LifecycleSettings::from(&self.config)
    }
}

fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, contents).expect("write file");
}

#[fixture]
fn deployment() -> Deployment {
    let root = TempDir::new().expect("create apps root");
    write(&root.path().join("shell/instances.toml"), LAYOUT);
    write(&root.path().join("shell/init.sh"), ENTRY_POINT);
    let config = Config {
        runtime_binary: Some(String::from("sh")),
        entry_point: Some(String::from("init.sh")),
        script_extension: Some(String::from("sh")),
        readiness_attempts: Some(100),
        readiness_interval_ms: Some(20),
        launch_settle_ms: Some(50),
        stop_timeout_ms: Some(2_000),
        kill_timeout_ms: Some(1_000),
        stop_poll_interval_ms: Some(20),
        ..Config::default()
    };
    Deployment { root, config }
}

#[rstest]
fn real_processes_start_report_and_stop(deployment: Deployment) {
    let processes = SystemProcesses;
    let supervisor = Supervisor::new(&processes, deployment.settings());
    let targets = deployment
        .resolver()
        .select(&Selector::all())
        .expect("topology resolves");
    assert_eq!(targets.len(), 2);

    for descriptor in &targets {
        let outcome = supervisor.start(descriptor).expect("start succeeds");
        assert!(
            matches!(
                outcome,
                StartOutcome::Started {
                    readiness: ReadinessReport::Confirmed,
                    ..
                }
            ),
            "unexpected start outcome {outcome:?}"
        );
        let log = fs::read_to_string(&descriptor.log_file_path).expect("read instance log");
        assert!(log.contains(&format!("booting {}", descriptor.id.instance_or_app())));
    }

    for entry in collect_status(&processes, &targets) {
        let state = entry.state.expect("probe succeeds");
        assert!(state.is_running(), "{} is {}", entry.id, state.label());
    }

    for descriptor in &targets {
        let outcome = supervisor.stop(descriptor).expect("stop succeeds");
        assert!(matches!(outcome, StopOutcome::Stopped { forced: false, .. }));
        assert_eq!(
            supervisor.probe(descriptor).expect("probe"),
            RunState::Stopped
        );
    }
}

#[rstest]
fn real_processes_restart_with_fresh_pids(deployment: Deployment) {
    let processes = SystemProcesses;
    let supervisor = Supervisor::new(&processes, deployment.settings());
    let coordinator = Coordinator::new(&supervisor);
    let selector: Selector = "shell:alpha".parse().expect("selector");
    let targets = deployment
        .resolver()
        .select(&selector)
        .expect("topology resolves");

    let started = coordinator.start(&targets);
    assert_eq!(started.status(), OperationStatus::Success);
    let Some(Outcome::Started { pid: first, .. }) = started.outcome(&targets[0].id) else {
        panic!("expected a launch");
    };
    let first = *first;

    let restarted = coordinator.restart(&targets, &selector, &mut AutoConfirm);
    assert_eq!(restarted.status(), OperationStatus::Success);
    let Some(Outcome::Restarted {
        start: StartOutcome::Started { record, .. },
        ..
    }) = restarted.outcome(&targets[0].id)
    else {
        panic!("expected a relaunch");
    };
    assert_ne!(record.pid, first);

    let stopped = coordinator.stop(&targets);
    assert_eq!(stopped.status(), OperationStatus::Success);
}
