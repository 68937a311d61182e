//! Test doubles shared by the lifecycle unit and behaviour tests.
//!
//! [`FakeProcesses`] is an in-memory process table: spawned "processes" are
//! entries with a PID and start token whose reaction to signals is scripted
//! per instance. The filesystem side (records, logs, layouts) stays real and
//! lives in a temporary directory owned by [`Sandbox`].

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use tempfile::TempDir;
use tend_config::{Config, StatePaths};

use crate::lifecycle::{LifecycleSettings, StopPolicy};
use crate::process::{
    ChildProcess, ExitReport, Pid, ProcessControl, ProcessIdentity, ProcessQueryError, Signal,
    SignalError, SpawnRequest,
};
use crate::readiness::ReadinessPolicy;
use crate::record::{PidRecord, write_record};
use crate::topology::{InstanceDescriptor, ResolverSettings, Selector, TopologyResolver};

/// How a fake process reacts once spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behaviour {
    /// Runs until signalled.
    Runs,
    /// Exits with the given code before the settle window ends.
    ExitsImmediately(i32),
    /// Survives the given number of identity queries, then dies.
    CrashesAfter(u32),
    /// Ignores `SIGTERM` but dies on `SIGKILL`.
    IgnoresTerminate,
    /// Survives every signal.
    Unkillable,
    /// The runtime binary cannot be executed.
    SpawnFails,
}

#[derive(Debug)]
struct FakeProcess {
    token: u64,
    alive: bool,
    exit_code: Option<i32>,
    behaviour: Behaviour,
    identity_budget: Option<u32>,
}

/// Call recorded for every successful spawn.
#[derive(Debug, Clone)]
pub(crate) struct SpawnLog {
    pub(crate) instance: String,
    pub(crate) pid: Pid,
    pub(crate) args: Vec<String>,
    pub(crate) env: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Table {
    next_pid: Pid,
    next_token: u64,
    processes: BTreeMap<Pid, FakeProcess>,
    behaviours: HashMap<String, Behaviour>,
    log_lines: HashMap<String, Vec<String>>,
    spawned: Vec<SpawnLog>,
    signals: Vec<(Pid, Signal)>,
}

impl Table {
    fn allocate(&mut self) -> (Pid, u64) {
        self.next_pid += 1;
        self.next_token += 1;
        (self.next_pid + 1000, self.next_token + 50_000)
    }
}

/// Scripted in-memory process table.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeProcesses {
    table: Rc<RefCell<Table>>,
}

impl FakeProcesses {
    /// Scripts how the next spawns of `instance` behave.
    pub(crate) fn script(&self, instance: &str, behaviour: Behaviour) {
        self.table
            .borrow_mut()
            .behaviours
            .insert(instance.to_owned(), behaviour);
    }

    /// Lines `instance` writes to its log as soon as it is spawned.
    pub(crate) fn logs_on_spawn(&self, instance: &str, lines: &[&str]) {
        self.table.borrow_mut().log_lines.insert(
            instance.to_owned(),
            lines.iter().map(|line| (*line).to_owned()).collect(),
        );
    }

    /// Inserts an unrelated live process at `pid`.
    pub(crate) fn occupy(&self, pid: Pid, token: u64) {
        self.table.borrow_mut().processes.insert(
            pid,
            FakeProcess {
                token,
                alive: true,
                exit_code: None,
                behaviour: Behaviour::Runs,
                identity_budget: None,
            },
        );
    }

    /// Kills `pid` behind the supervisor's back.
    pub(crate) fn crash(&self, pid: Pid) {
        if let Some(process) = self.table.borrow_mut().processes.get_mut(&pid) {
            process.alive = false;
        }
    }

    /// Whether `pid` is a live fake process.
    pub(crate) fn is_running(&self, pid: Pid) -> bool {
        self.table
            .borrow()
            .processes
            .get(&pid)
            .is_some_and(|process| process.alive)
    }

    /// Spawns in order.
    pub(crate) fn spawned(&self) -> Vec<SpawnLog> {
        self.table.borrow().spawned.clone()
    }

    /// Instance names in spawn order.
    pub(crate) fn spawn_order(&self) -> Vec<String> {
        self.spawned().into_iter().map(|log| log.instance).collect()
    }

    /// Signals delivered or attempted, in order.
    pub(crate) fn signals(&self) -> Vec<(Pid, Signal)> {
        self.table.borrow().signals.clone()
    }
}

/// Child handle for a fake process.
#[derive(Debug)]
pub(crate) struct FakeChild {
    pid: Pid,
    table: Rc<RefCell<Table>>,
}

impl ChildProcess for FakeChild {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitReport>> {
        let table = self.table.borrow();
        Ok(table
            .processes
            .get(&self.pid)
            .filter(|process| !process.alive)
            .map(|process| ExitReport {
                code: process.exit_code,
            }))
    }
}

impl ProcessControl for FakeProcesses {
    type Child = FakeChild;

    fn spawn(&self, mut request: SpawnRequest) -> io::Result<Self::Child> {
        let instance = request.id.to_string();
        let mut table = self.table.borrow_mut();
        let behaviour = table
            .behaviours
            .get(&instance)
            .copied()
            .unwrap_or(Behaviour::Runs);
        if behaviour == Behaviour::SpawnFails {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "runtime binary not found",
            ));
        }
        if let Some(lines) = table.log_lines.get(&instance) {
            for line in lines {
                writeln!(request.log, "{line}")?;
            }
        }
        let (pid, token) = table.allocate();
        let (alive, exit_code, identity_budget) = match behaviour {
            Behaviour::ExitsImmediately(code) => (false, Some(code), None),
            Behaviour::CrashesAfter(queries) => (true, None, Some(queries)),
            _ => (true, None, None),
        };
        table.processes.insert(
            pid,
            FakeProcess {
                token,
                alive,
                exit_code,
                behaviour,
                identity_budget,
            },
        );
        table.spawned.push(SpawnLog {
            instance,
            pid,
            args: request
                .args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
            env: request.env.clone(),
        });
        Ok(FakeChild {
            pid,
            table: Rc::clone(&self.table),
        })
    }

    fn signal(&self, pid: Pid, signal: Signal) -> Result<(), SignalError> {
        let mut table = self.table.borrow_mut();
        table.signals.push((pid, signal));
        let Some(process) = table.processes.get_mut(&pid).filter(|p| p.alive) else {
            return Err(SignalError::NoSuchProcess { pid });
        };
        let survives = match (signal, process.behaviour) {
            (_, Behaviour::Unkillable) | (Signal::Terminate, Behaviour::IgnoresTerminate) => true,
            _ => false,
        };
        if !survives {
            process.alive = false;
        }
        Ok(())
    }

    fn identity(&self, pid: Pid) -> Result<Option<ProcessIdentity>, ProcessQueryError> {
        let mut table = self.table.borrow_mut();
        let Some(process) = table.processes.get_mut(&pid) else {
            return Ok(None);
        };
        if let Some(budget) = process.identity_budget.as_mut() {
            if *budget == 0 {
                process.alive = false;
            } else {
                *budget -= 1;
            }
        }
        Ok(process.alive.then_some(ProcessIdentity {
            start_token: Some(process.token),
        }))
    }
}

/// Lifecycle settings with millisecond-scale deadlines.
pub(crate) fn fast_settings() -> LifecycleSettings {
    LifecycleSettings {
        runtime_binary: "runtime".into(),
        launch_settle: Duration::ZERO,
        readiness: ReadinessPolicy {
            attempts: 5,
            interval: Duration::from_millis(1),
        },
        stop: StopPolicy {
            graceful_timeout: Duration::from_millis(20),
            kill_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(1),
        },
    }
}

/// Temporary applications directory with helpers for writing layouts.
pub(crate) struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub(crate) fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create sandbox"),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent directory");
        }
        fs::write(&path, contents).expect("write sandbox file");
        path
    }

    /// Writes a multi-instance application with `instances` in order.
    pub(crate) fn multi_instance_app(&self, app: &str, instances: &[&str], marker: Option<&str>) {
        let mut layout = String::new();
        if let Some(marker) = marker {
            layout.push_str(&format!("[defaults]\nready_markers = [\"{marker}\"]\n\n"));
        }
        for name in instances {
            layout.push_str(&format!("[[instance]]\nname = \"{name}\"\n\n"));
        }
        self.write(&format!("{app}/instances.toml"), &layout);
        self.write(&format!("{app}/init.lua"), "-- entry point\n");
    }

    /// Writes a single-file application.
    pub(crate) fn single_file_app(&self, app: &str) {
        self.write(&format!("{app}.lua"), "-- entry point\n");
    }

    pub(crate) fn resolver(&self) -> TopologyResolver {
        let config = Config::default();
        TopologyResolver::new(
            ResolverSettings::from(&config),
            StatePaths::resolve(&config, self.root()),
        )
    }

    pub(crate) fn select(&self, selector: &str) -> Vec<InstanceDescriptor> {
        let parsed = Selector::from_argument(Some(selector)).expect("valid selector");
        self.resolver().select(&parsed).expect("selection resolves")
    }

    pub(crate) fn descriptor(&self, selector: &str) -> InstanceDescriptor {
        let mut selected = self.select(selector);
        assert_eq!(selected.len(), 1, "selector should address one instance");
        selected.remove(0)
    }

    /// Writes a record claiming `pid` with `token` for `descriptor`.
    pub(crate) fn plant_record(&self, descriptor: &InstanceDescriptor, pid: Pid, token: u64) {
        let record = PidRecord::new(&descriptor.id, pid, Some(token));
        write_record(&descriptor.pid_file_path, &record).expect("plant pid record");
    }

    /// Raw bytes of the record for `descriptor`, if any.
    pub(crate) fn record_bytes(&self, descriptor: &InstanceDescriptor) -> Option<Vec<u8>> {
        fs::read(&descriptor.pid_file_path).ok()
    }
}
