//! Command-line runtime for the `tend` instance supervisor.
//!
//! The runtime splits configuration flags from the command, loads layered
//! configuration, installs telemetry, and dispatches to the supervisor. IO
//! streams, the configuration loader and the process capability are all
//! injected so tests can drive the runtime in-process.

use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use tend_config::StatePathsError;
use tend_supervisor::{ProcessControl, SystemProcesses};

mod cli;
mod commands;
mod config;
mod errors;
mod output;
mod prompt;
mod telemetry;

use cli::Cli;
use commands::{Controller, Terminal};
use config::split_config_arguments;
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
pub(crate) use errors::AppError;

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: keep in sync with the fields of `tend_config::Config`.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--instances-enabled",
    "--run-dir",
    "--log-dir",
    "--runtime-binary",
    "--entry-point",
    "--script-extension",
    "--readiness-attempts",
    "--readiness-interval-ms",
    "--launch-settle-ms",
    "--stop-timeout-ms",
    "--kill-timeout-ms",
    "--stop-poll-interval-ms",
    "--log-filter",
    "--log-format",
];

/// Bundles the IO streams provided to the CLI runtime.
pub(crate) struct IoStreams<'a, R, W, E> {
    pub(crate) stdin: &'a mut R,
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

impl<'a, R: BufRead, W: Write, E: Write> IoStreams<'a, R, W, E> {
    pub(crate) fn new(stdin: &'a mut R, stdout: &'a mut W, stderr: &'a mut E) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
        }
    }
}

struct CliRunner<'a, R, W, E, L, P> {
    io: IoStreams<'a, R, W, E>,
    loader: &'a L,
    processes: &'a P,
    working_dir: Option<PathBuf>,
}

impl<'a, R, W, E, L, P> CliRunner<'a, R, W, E, L, P>
where
    R: BufRead,
    W: Write,
    E: Write,
    L: ConfigLoader,
    P: ProcessControl,
{
    const fn new(io: IoStreams<'a, R, W, E>, loader: &'a L, processes: &'a P) -> Self {
        Self {
            io,
            loader,
            processes,
            working_dir: None,
        }
    }

    #[cfg(test)]
    fn with_working_dir(mut self, working_dir: &std::path::Path) -> Self {
        self.working_dir = Some(working_dir.to_path_buf());
        self
    }

    fn run<I>(&mut self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        match self.try_run(args) {
            Ok(exit_code) => exit_code,
            Err(AppError::CliUsage(error))
                if matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) =>
            {
                let _ = write!(self.io.stdout, "{error}");
                ExitCode::SUCCESS
            }
            Err(error) => {
                let _ = writeln!(self.io.stderr, "{error}");
                ExitCode::FAILURE
            }
        }
    }

    fn try_run<I>(&mut self, args: I) -> Result<ExitCode, AppError>
    where
        I: IntoIterator<Item = OsString>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        let split = split_config_arguments(&args);
        let cli = Cli::try_parse_from(&split.command_arguments).map_err(AppError::CliUsage)?;
        let config = self.loader.load(&split.config_arguments)?;
        telemetry::initialise(&config)?;

        let working_dir = match &self.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(StatePathsError::WorkingDirectory)?,
        };
        let controller = Controller::new(&config, self.processes, &working_dir);
        let mut terminal = Terminal {
            stdin: &mut *self.io.stdin,
            stdout: &mut *self.io.stdout,
            stderr: &mut *self.io.stderr,
        };
        let exit_code = controller.execute(cli.command, &mut terminal)?;
        self.io.stdout.flush().map_err(AppError::Output)?;
        Ok(exit_code)
    }
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, R, W, E>(args: I, stdin: &mut R, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
{
    let io = IoStreams::new(stdin, stdout, stderr);
    CliRunner::new(io, &OrthoConfigLoader, &SystemProcesses).run(args)
}

/// Runs the CLI with a substitute loader in `working_dir`.
#[cfg(test)]
pub(crate) fn run_with_loader<I, R, W, E, L>(
    args: I,
    io: IoStreams<'_, R, W, E>,
    loader: &L,
    working_dir: &std::path::Path,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    CliRunner::new(io, loader, &SystemProcesses)
        .with_working_dir(working_dir)
        .run(args)
}
