//! Readiness detection by tailing an instance's log stream.
//!
//! The cursor is positioned at the end of the log before the instance is
//! spawned, so only output from the new process is inspected and markers left
//! by previous runs never count.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tend_config::Config;
use thiserror::Error;
use tracing::{debug, warn};

use crate::READINESS_TARGET;
use crate::topology::ReadinessMarkers;

/// Incremental reader over a growing log file.
#[derive(Debug)]
pub struct LogCursor {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl LogCursor {
    /// Positions a cursor at byte `offset` of `path`.
    #[must_use]
    pub fn at_offset(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            partial: Vec::new(),
        }
    }

    /// Positions a cursor at the current end of `path`, or at zero when the
    /// file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns IO errors other than a missing file.
    pub fn at_end(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let offset = match path.metadata() {
            Ok(metadata) => metadata.len(),
            Err(error) if error.kind() == io::ErrorKind::NotFound => 0,
            Err(error) => return Err(error),
        };
        Ok(Self::at_offset(path, offset))
    }

    /// Log file being tailed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the complete lines appended since the last call.
    ///
    /// A trailing line without a newline is held back until it is completed.
    /// If the file shrank (rotation or truncation) reading restarts from the
    /// beginning.
    ///
    /// # Errors
    ///
    /// Returns IO errors other than a missing file.
    pub fn read_lines(&mut self) -> io::Result<Vec<String>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error),
        };
        let length = file.metadata()?.len();
        if length < self.offset {
            self.offset = 0;
            self.partial.clear();
        }
        file.seek(SeekFrom::Start(self.offset))?;
        let mut fresh = Vec::new();
        let read = file.read_to_end(&mut fresh)?;
        self.offset += u64::try_from(read).unwrap_or(u64::MAX);
        self.partial.extend_from_slice(&fresh);

        let mut lines = Vec::new();
        while let Some(newline) = self.partial.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=newline).collect();
            let text = String::from_utf8_lossy(&line);
            lines.push(text.trim_end_matches(['\n', '\r']).to_owned());
        }
        Ok(lines)
    }
}

/// Bounds on how long readiness is awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Maximum number of polls; values below one are treated as one.
    pub attempts: u32,
    /// Delay between polls.
    pub interval: Duration,
}

impl From<&Config> for ReadinessPolicy {
    fn from(config: &Config) -> Self {
        Self {
            attempts: config.readiness_attempts(),
            interval: config.readiness_interval(),
        }
    }
}

/// Outcome of waiting for a readiness marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// A marker appeared.
    Ready {
        /// The log line that matched.
        line: String,
    },
    /// The process stopped before a marker appeared.
    Exited,
    /// Every attempt passed without a marker.
    TimedOut {
        /// Polls performed.
        attempts: u32,
    },
}

/// Failure to read the log stream.
#[derive(Debug, Error)]
#[error("failed to read log stream '{path}': {source}")]
pub struct ReadinessError {
    /// Log file path.
    pub path: PathBuf,
    /// Underlying IO error.
    #[source]
    pub source: io::Error,
}

/// Polls a log cursor for readiness markers.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessDetector {
    policy: ReadinessPolicy,
}

impl ReadinessDetector {
    /// Creates a detector with `policy`.
    #[must_use]
    pub const fn new(policy: ReadinessPolicy) -> Self {
        Self { policy }
    }

    /// Waits until a line matches `markers`, the process exits, or the
    /// attempts run out.
    ///
    /// `still_alive` is consulted after each poll that found no marker, so a
    /// marker written just before the process exited still counts.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError`] when the log cannot be read.
    pub fn await_ready<F>(
        &self,
        cursor: &mut LogCursor,
        markers: &ReadinessMarkers,
        mut still_alive: F,
    ) -> Result<Readiness, ReadinessError>
    where
        F: FnMut() -> bool,
    {
        let attempts = self.policy.attempts.max(1);
        for attempt in 1..=attempts {
            let lines = cursor.read_lines().map_err(|source| ReadinessError {
                path: cursor.path().to_path_buf(),
                source,
            })?;
            if let Some(line) = lines.into_iter().find(|line| markers.matches(line)) {
                debug!(target: READINESS_TARGET, attempt, %line, "readiness marker found");
                return Ok(Readiness::Ready { line });
            }
            if !still_alive() {
                return Ok(Readiness::Exited);
            }
            if attempt < attempts {
                thread::sleep(self.policy.interval);
            }
        }
        warn!(
            target: READINESS_TARGET,
            attempts,
            log = %cursor.path().display(),
            "no readiness marker observed"
        );
        Ok(Readiness::TimedOut { attempts })
    }
}
