//! Errors surfaced by the CLI runtime.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tend_config::StatePathsError;
use tend_supervisor::TopologyError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    WorkingDirectory(#[from] StatePathsError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error("failed to run '{program}': {source}")]
    RunScript {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to render the configuration file: {0}")]
    SerialiseConfig(#[from] toml::ser::Error),
    #[error("failed to write '{path}': {source}")]
    WriteConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
}
