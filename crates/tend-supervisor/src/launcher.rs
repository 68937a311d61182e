//! Spawns instances and records their identity.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info};

use crate::LAUNCHER_TARGET;
use crate::process::{ChildProcess, ExitReport, ProcessControl, Signal, SpawnRequest};
use crate::readiness::LogCursor;
use crate::record::{PidRecord, RecordError, write_record};
use crate::topology::InstanceDescriptor;

/// Environment variable naming the application of the launched instance.
pub const ENV_APP_NAME: &str = "TEND_APP_NAME";
/// Environment variable naming the launched instance.
pub const ENV_INSTANCE_NAME: &str = "TEND_INSTANCE_NAME";
/// Environment variable carrying the console socket path.
pub const ENV_CONSOLE_SOCKET: &str = "TEND_CONSOLE_SOCKET";
/// Environment variable carrying the log file path.
pub const ENV_LOG_FILE: &str = "TEND_LOG_FILE";

const SETTLE_POLL: Duration = Duration::from_millis(10);

/// A launched instance.
#[derive(Debug)]
pub struct Launch {
    /// Record persisted for the new process.
    pub record: PidRecord,
    /// Log cursor positioned before the process wrote anything.
    pub cursor: LogCursor,
}

/// Errors raised while launching.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The entry point does not exist.
    #[error("entry point '{path}' does not exist")]
    MissingEntryPoint {
        /// Expected entry point.
        path: PathBuf,
    },
    /// A state directory could not be created.
    #[error("failed to create directory '{path}': {source}")]
    PrepareDirectory {
        /// Directory path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The log file could not be opened.
    #[error("failed to open log file '{path}': {source}")]
    OpenLog {
        /// Log path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The runtime could not be spawned.
    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        /// Runtime binary.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The child exited during the settle window.
    #[error("instance exited right after launch ({exit})")]
    ExitedEarly {
        /// Observed exit status.
        exit: ExitReport,
    },
    /// The child vanished before its identity could be captured.
    #[error("instance process {pid} disappeared right after launch")]
    Vanished {
        /// PID of the vanished child.
        pid: u32,
    },
    /// The child's status could not be queried.
    #[error("failed to monitor launched process: {0}")]
    Monitor(#[source] io::Error),
    /// The PID record could not be written; the child was killed.
    #[error("failed to record launched process: {0}")]
    PidFileWrite(#[source] RecordError),
}

/// Launches instances through a [`ProcessControl`].
#[derive(Debug)]
pub struct Launcher<'p, P> {
    processes: &'p P,
    runtime_binary: OsString,
    settle: Duration,
}

impl<'p, P: ProcessControl> Launcher<'p, P> {
    /// Creates a launcher running entry points with `runtime_binary`.
    pub fn new(processes: &'p P, runtime_binary: impl Into<OsString>, settle: Duration) -> Self {
        Self {
            processes,
            runtime_binary: runtime_binary.into(),
            settle,
        }
    }

    /// Spawns `descriptor` and persists its PID record.
    ///
    /// The process is detached, its output appended to the log stream. A
    /// child that exits within the settle window is a launch failure and
    /// leaves no record. If the record cannot be written the child is killed
    /// so no untracked instance is left behind.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] describing which step failed.
    pub fn launch(&self, descriptor: &InstanceDescriptor) -> Result<Launch, LaunchError> {
        if !descriptor.entry_point.is_file() {
            return Err(LaunchError::MissingEntryPoint {
                path: descriptor.entry_point.clone(),
            });
        }
        for file in [
            &descriptor.pid_file_path,
            &descriptor.log_file_path,
            &descriptor.console_socket_path,
        ] {
            prepare_parent(file)?;
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&descriptor.log_file_path)
            .map_err(|source| LaunchError::OpenLog {
                path: descriptor.log_file_path.clone(),
                source,
            })?;
        let offset = log
            .metadata()
            .map_err(|source| LaunchError::OpenLog {
                path: descriptor.log_file_path.clone(),
                source,
            })?
            .len();

        let request = self.spawn_request(descriptor, log);
        let mut child =
            self.processes
                .spawn(request)
                .map_err(|source| LaunchError::SpawnFailed {
                    program: self.runtime_binary.to_string_lossy().into_owned(),
                    source,
                })?;
        let pid = child.pid();
        self.settle(&mut child)?;

        let identity = match self.processes.identity(pid) {
            Ok(Some(identity)) => identity,
            Ok(None) => return Err(LaunchError::Vanished { pid }),
            Err(error) => return Err(LaunchError::Monitor(error.source)),
        };
        let record = PidRecord::new(&descriptor.id, pid, identity.start_token);
        if let Err(write_error) = write_record(&descriptor.pid_file_path, &record) {
            error!(
                target: LAUNCHER_TARGET,
                instance = %descriptor.id,
                pid,
                error = %write_error,
                "killing instance whose pid record could not be written"
            );
            if let Err(kill_error) = self.processes.signal(pid, Signal::Kill) {
                error!(target: LAUNCHER_TARGET, pid, error = %kill_error, "kill failed");
            }
            return Err(LaunchError::PidFileWrite(write_error));
        }
        info!(
            target: LAUNCHER_TARGET,
            instance = %descriptor.id,
            pid,
            "instance launched"
        );
        Ok(Launch {
            record,
            cursor: LogCursor::at_offset(&descriptor.log_file_path, offset),
        })
    }

    fn spawn_request(&self, descriptor: &InstanceDescriptor, log: fs::File) -> SpawnRequest {
        let mut args = Vec::with_capacity(descriptor.args.len() + 1);
        args.push(descriptor.entry_point.clone().into_os_string());
        args.extend(descriptor.args.iter().map(OsString::from));

        let mut env = vec![
            (String::from(ENV_APP_NAME), descriptor.id.app().to_owned()),
            (
                String::from(ENV_INSTANCE_NAME),
                descriptor.id.instance_or_app().to_owned(),
            ),
            (
                String::from(ENV_CONSOLE_SOCKET),
                descriptor.console_socket_path.to_string_lossy().into_owned(),
            ),
            (
                String::from(ENV_LOG_FILE),
                descriptor.log_file_path.to_string_lossy().into_owned(),
            ),
        ];
        env.extend(descriptor.env.iter().cloned());

        SpawnRequest {
            id: descriptor.id.clone(),
            program: self.runtime_binary.clone(),
            args,
            working_dir: descriptor.working_dir.clone(),
            env,
            log,
        }
    }

    fn settle(&self, child: &mut P::Child) -> Result<(), LaunchError> {
        let deadline = Instant::now() + self.settle;
        loop {
            if let Some(exit) = child.try_wait().map_err(LaunchError::Monitor)? {
                return Err(LaunchError::ExitedEarly { exit });
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(SETTLE_POLL.min(deadline - now));
        }
    }
}

fn prepare_parent(file: &Path) -> Result<(), LaunchError> {
    let Some(parent) = file.parent() else {
        return Ok(());
    };
    fs::create_dir_all(parent).map_err(|source| LaunchError::PrepareDirectory {
        path: parent.to_path_buf(),
        source,
    })
}
