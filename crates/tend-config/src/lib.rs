//! Shared configuration for the `tend` instance supervisor.
//!
//! Configuration is layered by `ortho_config`: built-in defaults, then a
//! `.tend.toml` file, then `TEND_*` environment variables, then CLI flags.
//! Every field is optional so that absent layers never shadow lower ones; the
//! accessor methods on [`Config`] apply the defaults from [`defaults`].

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub mod defaults;
mod logging;
mod paths;

pub use defaults::{
    DEFAULT_ENTRY_POINT, DEFAULT_INSTANCES_ENABLED, DEFAULT_LOG_DIR, DEFAULT_LOG_FILTER,
    DEFAULT_RUN_DIR, DEFAULT_RUNTIME_BINARY, DEFAULT_SCRIPT_EXTENSION, default_log_filter,
    default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use paths::{InstancePaths, StatePaths, StatePathsError};

/// Name of the configuration file written by `tend init` and discovered by
/// the loader.
pub const CONFIG_FILE_NAME: &str = ".tend.toml";

/// Supervisor configuration resolved from files, environment and flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "TEND")]
pub struct Config {
    /// Directory holding the enabled applications.
    #[ortho_config(default = Utf8PathBuf::from(DEFAULT_INSTANCES_ENABLED))]
    pub instances_enabled: Option<Utf8PathBuf>,
    /// Directory that receives PID records and console sockets.
    #[ortho_config(default = Utf8PathBuf::from(DEFAULT_RUN_DIR))]
    pub run_dir: Option<Utf8PathBuf>,
    /// Directory that receives per-instance log files.
    #[ortho_config(default = Utf8PathBuf::from(DEFAULT_LOG_DIR))]
    pub log_dir: Option<Utf8PathBuf>,
    /// Interpreter used to launch instance entry points.
    #[ortho_config(default = String::from(DEFAULT_RUNTIME_BINARY))]
    pub runtime_binary: Option<String>,
    /// Entry point file name inside directory applications.
    #[ortho_config(default = String::from(DEFAULT_ENTRY_POINT))]
    pub entry_point: Option<String>,
    /// File extension identifying single-file applications.
    #[ortho_config(default = String::from(DEFAULT_SCRIPT_EXTENSION))]
    pub script_extension: Option<String>,
    /// Number of log polls before readiness is declared unconfirmed.
    #[ortho_config(default = defaults::DEFAULT_READINESS_ATTEMPTS)]
    pub readiness_attempts: Option<u32>,
    /// Delay between readiness polls, in milliseconds.
    #[ortho_config(default = defaults::DEFAULT_READINESS_INTERVAL_MS)]
    pub readiness_interval_ms: Option<u64>,
    /// Window after spawning in which an early exit counts as a launch failure.
    #[ortho_config(default = defaults::DEFAULT_LAUNCH_SETTLE_MS)]
    pub launch_settle_ms: Option<u64>,
    /// Grace period after the termination request, in milliseconds.
    #[ortho_config(default = defaults::DEFAULT_STOP_TIMEOUT_MS)]
    pub stop_timeout_ms: Option<u64>,
    /// Grace period after the forced kill, in milliseconds.
    #[ortho_config(default = defaults::DEFAULT_KILL_TIMEOUT_MS)]
    pub kill_timeout_ms: Option<u64>,
    /// Delay between liveness polls while stopping, in milliseconds.
    #[ortho_config(default = defaults::DEFAULT_STOP_POLL_INTERVAL_MS)]
    pub stop_poll_interval_ms: Option<u64>,
    /// Tracing filter expression.
    #[ortho_config(default = String::from(DEFAULT_LOG_FILTER))]
    pub log_filter: Option<String>,
    /// Tracing output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: Option<LogFormat>,
}

impl Config {
    /// Returns a configuration with every field populated by its default.
    ///
    /// This is the document rendered by `tend init`.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            instances_enabled: Some(Utf8PathBuf::from(DEFAULT_INSTANCES_ENABLED)),
            run_dir: Some(Utf8PathBuf::from(DEFAULT_RUN_DIR)),
            log_dir: Some(Utf8PathBuf::from(DEFAULT_LOG_DIR)),
            runtime_binary: Some(String::from(DEFAULT_RUNTIME_BINARY)),
            entry_point: Some(String::from(DEFAULT_ENTRY_POINT)),
            script_extension: Some(String::from(DEFAULT_SCRIPT_EXTENSION)),
            readiness_attempts: Some(defaults::DEFAULT_READINESS_ATTEMPTS),
            readiness_interval_ms: Some(defaults::DEFAULT_READINESS_INTERVAL_MS),
            launch_settle_ms: Some(defaults::DEFAULT_LAUNCH_SETTLE_MS),
            stop_timeout_ms: Some(defaults::DEFAULT_STOP_TIMEOUT_MS),
            kill_timeout_ms: Some(defaults::DEFAULT_KILL_TIMEOUT_MS),
            stop_poll_interval_ms: Some(defaults::DEFAULT_STOP_POLL_INTERVAL_MS),
            log_filter: Some(String::from(DEFAULT_LOG_FILTER)),
            log_format: Some(default_log_format()),
        }
    }

    /// Directory holding the enabled applications.
    #[must_use]
    pub fn instances_enabled(&self) -> &Utf8Path {
        self.instances_enabled
            .as_deref()
            .unwrap_or_else(|| Utf8Path::new(DEFAULT_INSTANCES_ENABLED))
    }

    /// Run directory, possibly relative to [`Self::instances_enabled`].
    #[must_use]
    pub fn run_dir(&self) -> &Utf8Path {
        self.run_dir
            .as_deref()
            .unwrap_or_else(|| Utf8Path::new(DEFAULT_RUN_DIR))
    }

    /// Log directory, possibly relative to [`Self::instances_enabled`].
    #[must_use]
    pub fn log_dir(&self) -> &Utf8Path {
        self.log_dir
            .as_deref()
            .unwrap_or_else(|| Utf8Path::new(DEFAULT_LOG_DIR))
    }

    /// Interpreter used to launch instance entry points.
    #[must_use]
    pub fn runtime_binary(&self) -> &str {
        self.runtime_binary
            .as_deref()
            .unwrap_or(DEFAULT_RUNTIME_BINARY)
    }

    /// Entry point file name inside directory applications.
    #[must_use]
    pub fn entry_point(&self) -> &str {
        self.entry_point.as_deref().unwrap_or(DEFAULT_ENTRY_POINT)
    }

    /// Extension of single-file applications, without the leading dot.
    #[must_use]
    pub fn script_extension(&self) -> &str {
        self.script_extension
            .as_deref()
            .map_or(DEFAULT_SCRIPT_EXTENSION, |extension| {
                extension.trim_start_matches('.')
            })
    }

    /// Maximum number of readiness polls.
    #[must_use]
    pub fn readiness_attempts(&self) -> u32 {
        self.readiness_attempts
            .unwrap_or(defaults::DEFAULT_READINESS_ATTEMPTS)
    }

    /// Delay between readiness polls.
    #[must_use]
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(
            self.readiness_interval_ms
                .unwrap_or(defaults::DEFAULT_READINESS_INTERVAL_MS),
        )
    }

    /// Window after spawning in which an early exit fails the launch.
    #[must_use]
    pub fn launch_settle(&self) -> Duration {
        Duration::from_millis(
            self.launch_settle_ms
                .unwrap_or(defaults::DEFAULT_LAUNCH_SETTLE_MS),
        )
    }

    /// Grace period after the termination request.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(
            self.stop_timeout_ms
                .unwrap_or(defaults::DEFAULT_STOP_TIMEOUT_MS),
        )
    }

    /// Grace period after the forced kill.
    #[must_use]
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(
            self.kill_timeout_ms
                .unwrap_or(defaults::DEFAULT_KILL_TIMEOUT_MS),
        )
    }

    /// Delay between liveness polls while waiting for termination.
    #[must_use]
    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.stop_poll_interval_ms
                .unwrap_or(defaults::DEFAULT_STOP_POLL_INTERVAL_MS),
        )
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Tracing output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_else(default_log_format)
    }
}
