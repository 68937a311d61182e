//! Executes parsed commands against the supervisor.

use std::ffi::OsString;
use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;
use std::process::{Command as ProcessCommand, ExitCode};

use tend_config::{CONFIG_FILE_NAME, Config, StatePaths};
use tend_supervisor::{
    AutoConfirm, Confirm, Coordinator, InstanceDescriptor, LifecycleSettings, OperationReport,
    ProcessControl, ResolverSettings, Selector, Supervisor, TopologyResolver, collect_status,
};
use tracing::info;

use crate::cli::Command;
use crate::errors::AppError;
use crate::output::{render_report, render_status, status_is_complete};
use crate::prompt::PromptConfirm;

/// Streams a command reads answers from and writes results to.
pub(crate) struct Terminal<'a, R, W, E> {
    pub(crate) stdin: &'a mut R,
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

/// Runs commands for one invocation.
pub(crate) struct Controller<'a, P> {
    config: &'a Config,
    processes: &'a P,
    working_dir: &'a Path,
}

impl<'a, P: ProcessControl> Controller<'a, P> {
    pub(crate) const fn new(config: &'a Config, processes: &'a P, working_dir: &'a Path) -> Self {
        Self {
            config,
            processes,
            working_dir,
        }
    }

    pub(crate) fn execute<R, W, E>(
        &self,
        command: Command,
        terminal: &mut Terminal<'_, R, W, E>,
    ) -> Result<ExitCode, AppError>
    where
        R: BufRead,
        W: Write,
        E: Write,
    {
        let selector = command.selector().unwrap_or_default();
        match command {
            Command::Start { .. } => {
                self.lifecycle(&selector, terminal, |coordinator, targets, _| {
                    coordinator.start(targets)
                })
            }
            Command::Stop { .. } => {
                self.lifecycle(&selector, terminal, |coordinator, targets, _| {
                    coordinator.stop(targets)
                })
            }
            Command::Restart { yes, .. } => {
                self.lifecycle(&selector, terminal, |coordinator, targets, terminal| {
                    if yes {
                        coordinator.restart(targets, &selector, &mut AutoConfirm)
                    } else {
                        let mut prompt =
                            PromptConfirm::new(&mut *terminal.stdin, &mut *terminal.stdout);
                        coordinator.restart(targets, &selector, &mut prompt)
                    }
                })
            }
            Command::Status { .. } => self.status(&selector, terminal),
            Command::Run { script, arguments } => self.run_script(&script, &arguments),
            Command::Init { force } => self.init(force, terminal),
        }
    }

    fn resolver(&self) -> TopologyResolver {
        TopologyResolver::new(
            ResolverSettings::from(self.config),
            StatePaths::resolve(self.config, self.working_dir),
        )
    }

    fn lifecycle<R, W, E, F>(
        &self,
        selector: &Selector,
        terminal: &mut Terminal<'_, R, W, E>,
        operation: F,
    ) -> Result<ExitCode, AppError>
    where
        R: BufRead,
        W: Write,
        E: Write,
        F: FnOnce(
            &Coordinator<'_, '_, P>,
            &[InstanceDescriptor],
            &mut Terminal<'_, R, W, E>,
        ) -> OperationReport,
    {
        let targets = self.resolver().select(selector)?;
        let supervisor = Supervisor::new(self.processes, LifecycleSettings::from(self.config));
        let coordinator = Coordinator::new(&supervisor);
        let report = operation(&coordinator, &targets, terminal);
        info!(
            operation = %report.operation,
            selector = %selector,
            instances = report.instances.len(),
            status = ?report.status(),
            "operation finished"
        );
        render_report(&report, &mut *terminal.stdout, &mut *terminal.stderr)
            .map_err(AppError::Output)?;
        Ok(ExitCode::from(report.status().exit_code()))
    }

    fn status<R, W, E>(
        &self,
        selector: &Selector,
        terminal: &mut Terminal<'_, R, W, E>,
    ) -> Result<ExitCode, AppError>
    where
        W: Write,
    {
        let targets = self.resolver().select(selector)?;
        let entries = collect_status(self.processes, &targets);
        render_status(&entries, &mut *terminal.stdout).map_err(AppError::Output)?;
        Ok(if status_is_complete(&entries) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    }

    fn run_script(&self, script: &Path, arguments: &[OsString]) -> Result<ExitCode, AppError> {
        let program = self.config.runtime_binary();
        let status = ProcessCommand::new(program)
            .arg(self.working_dir.join(script))
            .args(arguments)
            .current_dir(self.working_dir)
            .status()
            .map_err(|source| AppError::RunScript {
                program: program.to_owned(),
                source,
            })?;
        Ok(status
            .code()
            .and_then(|code| u8::try_from(code).ok())
            .map_or(ExitCode::FAILURE, ExitCode::from))
    }

    fn init<R, W, E>(
        &self,
        force: bool,
        terminal: &mut Terminal<'_, R, W, E>,
    ) -> Result<ExitCode, AppError>
    where
        R: BufRead,
        W: Write,
    {
        let path = self.working_dir.join(CONFIG_FILE_NAME);
        if path.exists() && !force {
            let mut prompt = PromptConfirm::new(&mut *terminal.stdin, &mut *terminal.stdout);
            if !prompt.confirm(&format!("{CONFIG_FILE_NAME} already exists. Overwrite?")) {
                writeln!(terminal.stdout, "Init is cancelled.").map_err(AppError::Output)?;
                return Ok(ExitCode::SUCCESS);
            }
        }
        let document = toml::to_string(&Config::with_defaults())?;
        fs::write(&path, document).map_err(|source| AppError::WriteConfig {
            path: path.clone(),
            source,
        })?;
        writeln!(terminal.stdout, "Environment config is written to '{}'.", path.display())
            .map_err(AppError::Output)?;
        Ok(ExitCode::SUCCESS)
    }
}
