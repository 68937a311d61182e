//! Entry point for the `tend` binary.
//!
//! Delegates to [`tend_cli::run`] with the locked standard streams.

use std::io::{self, StderrLock, StdinLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdin: StdinLock<'_> = io::stdin().lock();
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    tend_cli::run(std::env::args_os(), &mut stdin, &mut stdout, &mut stderr)
}
