//! Command-line grammar.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tend_supervisor::Selector;

#[derive(Parser, Debug)]
#[command(
    name = "tend",
    version,
    about = "Starts, stops and inspects application instances",
    disable_help_subcommand = true
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Starts the selected instances.
    Start {
        /// `app` or `app:instance`; every application when omitted.
        #[arg(value_name = "APP[:INSTANCE]")]
        target: Option<Selector>,
    },
    /// Stops the selected instances.
    Stop {
        /// `app` or `app:instance`; every application when omitted.
        #[arg(value_name = "APP[:INSTANCE]")]
        target: Option<Selector>,
    },
    /// Stops then starts the selected instances after confirmation.
    Restart {
        /// `app` or `app:instance`; every application when omitted.
        #[arg(value_name = "APP[:INSTANCE]")]
        target: Option<Selector>,
        /// Skips the confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Reports the state of the selected instances.
    Status {
        /// `app` or `app:instance`; every application when omitted.
        #[arg(value_name = "APP[:INSTANCE]")]
        target: Option<Selector>,
    },
    /// Runs a script with the runtime in the foreground.
    Run {
        /// Script passed to the runtime.
        script: PathBuf,
        /// Arguments passed to the script.
        #[arg(
            value_name = "ARG",
            num_args = 0..,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        arguments: Vec<OsString>,
    },
    /// Writes a configuration file with the default settings.
    Init {
        /// Overwrites an existing file without asking.
        #[arg(long)]
        force: bool,
    },
}

impl Command {
    /// Selector of a lifecycle command, defaulting to everything.
    pub(crate) fn selector(&self) -> Option<Selector> {
        match self {
            Self::Start { target }
            | Self::Stop { target }
            | Self::Restart { target, .. }
            | Self::Status { target } => Some(target.clone().unwrap_or_default()),
            Self::Run { .. } | Self::Init { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::error::ErrorKind;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("tend").chain(args.iter().copied()))
    }

    #[rstest]
    fn restart_accepts_short_confirmation_flag() {
        let cli = parse(&["restart", "app:router", "-y"]).expect("parse restart");
        let Command::Restart { target, yes } = cli.command else {
            panic!("expected restart");
        };
        assert!(yes);
        let target = target.expect("target");
        assert_eq!(target.app(), Some("app"));
        assert_eq!(target.instance(), Some("router"));
    }

    #[rstest]
    fn missing_selector_means_everything() {
        let cli = parse(&["status"]).expect("parse status");
        assert_eq!(cli.command.selector(), Some(Selector::all()));
    }

    #[rstest]
    #[case("app:")]
    #[case(":inst")]
    #[case("a:b:c")]
    fn malformed_selectors_are_usage_errors(#[case] selector: &str) {
        let error = parse(&["start", selector]).expect_err("selector should be rejected");
        assert_eq!(error.kind(), ErrorKind::ValueValidation);
    }

    #[rstest]
    fn run_keeps_hyphenated_script_arguments() {
        let cli = parse(&["run", "bench.lua", "--rounds", "3"]).expect("parse run");
        let Command::Run { script, arguments } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(script, PathBuf::from("bench.lua"));
        assert_eq!(arguments, ["--rounds", "3"]);
    }
}
