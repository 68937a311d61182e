//! Separates configuration flags from the command line.
//!
//! Configuration flags precede the command token. Everything up to the first
//! token that is not a recognised configuration flag (or its value) goes to
//! `ortho_config`; the rest is parsed by clap.

use std::ffi::{OsStr, OsString};

use ortho_config::OrthoConfig;
use tend_config::Config;

use crate::errors::AppError;

/// Loads configuration from the arguments that precede the command.
pub(crate) trait ConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

/// Loader backed by `ortho_config` layering.
pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    if !text.starts_with("--") {
        return FlagAction::Stop;
    }
    let (flag, inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (&*text, false),
    };
    if super::CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !inline_value,
        }
    } else {
        FlagAction::Stop
    }
}

/// Arguments for the loader and for the command parser.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_arguments: Vec<OsString>,
}

/// Splits `args` (including the program name) into loader and command parts.
///
/// Both halves keep the program name as their first element.
pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some((program, rest)) = args.split_first() else {
        return ConfigArgumentSplit::default();
    };
    let mut config_arguments = vec![program.clone()];
    let mut remaining = rest.iter().peekable();
    while let Some(argument) = remaining.peek() {
        let FlagAction::Include { needs_value } = classify(argument) else {
            break;
        };
        config_arguments.extend(remaining.next().cloned());
        if needs_value {
            config_arguments.extend(remaining.next().cloned());
        }
    }
    let mut command_arguments = vec![program.clone()];
    command_arguments.extend(remaining.cloned());
    ConfigArgumentSplit {
        config_arguments,
        command_arguments,
    }
}
