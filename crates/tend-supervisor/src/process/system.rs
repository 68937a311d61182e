//! [`ProcessControl`] backed by the host operating system.

use std::io;
use std::process::{Child, Command, Stdio};

use tracing::debug;

use super::{
    ChildProcess, ExitReport, Pid, ProcessControl, ProcessIdentity, ProcessQueryError, Signal,
    SignalError, SpawnRequest,
};
use crate::PROCESS_TARGET;

/// Process control for the real host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcesses;

/// Child spawned by [`SystemProcesses`].
#[derive(Debug)]
pub struct SystemChild(Child);

impl ChildProcess for SystemChild {
    fn pid(&self) -> Pid {
        self.0.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitReport>> {
        Ok(self
            .0
            .try_wait()?
            .map(|status| ExitReport { code: status.code() }))
    }
}

impl ProcessControl for SystemProcesses {
    type Child = SystemChild;

    fn spawn(&self, request: SpawnRequest) -> io::Result<Self::Child> {
        let stderr = request.log.try_clone()?;
        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .current_dir(&request.working_dir)
            .envs(request.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::from(request.log))
            .stderr(Stdio::from(stderr));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // A fresh process group keeps terminal signals aimed at the CLI
            // away from the instance, and lets stop reach its descendants.
            command.process_group(0);
        }
        let child = command.spawn()?;
        debug!(
            target: PROCESS_TARGET,
            instance = %request.id,
            pid = child.id(),
            program = %request.program.to_string_lossy(),
            "spawned instance process"
        );
        Ok(SystemChild(child))
    }

    fn signal(&self, pid: Pid, signal: Signal) -> Result<(), SignalError> {
        #[cfg(unix)]
        {
            super::unix::send_signal(pid, signal)
        }
        #[cfg(not(unix))]
        {
            let _ = (pid, signal);
            Err(SignalError::Unsupported)
        }
    }

    fn identity(&self, pid: Pid) -> Result<Option<ProcessIdentity>, ProcessQueryError> {
        #[cfg(unix)]
        {
            super::unix::identity(pid)
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
            Ok(None)
        }
    }
}
