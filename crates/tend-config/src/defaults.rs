//! Built-in defaults applied when no configuration layer sets a value.

use crate::logging::LogFormat;

/// Applications are discovered in the working directory unless configured.
pub const DEFAULT_INSTANCES_ENABLED: &str = ".";

/// Run directory, resolved against the applications directory when relative.
pub const DEFAULT_RUN_DIR: &str = "var/run";

/// Log directory, resolved against the applications directory when relative.
pub const DEFAULT_LOG_DIR: &str = "var/log";

/// Interpreter that executes instance entry points.
pub const DEFAULT_RUNTIME_BINARY: &str = "tarantool";

/// Entry point looked up inside directory applications.
pub const DEFAULT_ENTRY_POINT: &str = "init.lua";

/// Extension that marks a file as a single-file application.
pub const DEFAULT_SCRIPT_EXTENSION: &str = "lua";

/// Readiness polls before giving up (200 x 50ms is roughly ten seconds).
pub const DEFAULT_READINESS_ATTEMPTS: u32 = 200;

/// Delay between readiness polls.
pub const DEFAULT_READINESS_INTERVAL_MS: u64 = 50;

/// Early-exit detection window after spawning.
pub const DEFAULT_LAUNCH_SETTLE_MS: u64 = 100;

/// Grace period after the termination request.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 10_000;

/// Grace period after the forced kill.
pub const DEFAULT_KILL_TIMEOUT_MS: u64 = 2_000;

/// Liveness poll interval while stopping.
pub const DEFAULT_STOP_POLL_INTERVAL_MS: u64 = 200;

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Default log filter expression used by the binary.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binary.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}
