//! Durable PID records.
//!
//! A record names the process launched for an instance together with its
//! start token, so a later probe can tell the original process from an
//! unrelated one that inherited the PID. Records are written atomically and
//! removal is idempotent.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tempfile::Builder;
use thiserror::Error;
use tracing::info;

use crate::RECORD_TARGET;
use crate::process::Pid;
use crate::topology::InstanceId;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Persistent identity of a launched instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidRecord {
    /// PID of the launched process.
    pub pid: Pid,
    /// Kernel start token captured right after launch.
    pub start_token: Option<u64>,
    /// Launch time in milliseconds since the Unix epoch.
    pub launched_at_ms: u64,
    /// Application name.
    pub app: String,
    /// Instance name, or the application name for single instances.
    pub instance: String,
}

impl PidRecord {
    /// Builds a record for `id` stamped with the current time.
    #[must_use]
    pub fn new(id: &InstanceId, pid: Pid, start_token: Option<u64>) -> Self {
        Self {
            pid,
            start_token,
            launched_at_ms: now_ms(),
            app: id.app().to_owned(),
            instance: id.instance_or_app().to_owned(),
        }
    }
}

/// What was found at a record path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    /// No record exists.
    Missing,
    /// A well-formed record.
    Present(PidRecord),
    /// Something exists but cannot be interpreted as a record.
    Unreadable {
        /// Why parsing failed.
        reason: String,
    },
}

/// Errors raised while persisting or removing records.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The record could not be read.
    #[error("failed to read pid record '{path}': {source}")]
    Read {
        /// Record path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The record could not be written.
    #[error("failed to write pid record '{path}': {source}")]
    Write {
        /// Record path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The record could not be serialised.
    #[error("failed to serialise pid record: {0}")]
    Serialise(#[from] serde_json::Error),
    /// The record could not be removed.
    #[error("failed to remove pid record '{path}': {source}")]
    Remove {
        /// Record path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Reads the record at `path`.
///
/// Besides the JSON form, a bare decimal PID is accepted as a record without
/// a start token. Such a record only describes a running instance on
/// platforms that report no start tokens at all.
///
/// # Errors
///
/// Returns [`RecordError::Read`] for IO failures other than a missing file.
pub fn read_record(path: &Path) -> Result<RecordState, RecordError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(RecordState::Missing),
        Err(error) if error.kind() == io::ErrorKind::InvalidData => {
            return Ok(RecordState::Unreadable {
                reason: error.to_string(),
            });
        }
        Err(source) => {
            return Err(RecordError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    Ok(parse_record(&text))
}

fn parse_record(text: &str) -> RecordState {
    match serde_json::from_str::<PidRecord>(text) {
        Ok(record) => RecordState::Present(record),
        Err(json_error) => match text.trim().parse::<Pid>() {
            Ok(pid) if pid > 0 => RecordState::Present(PidRecord {
                pid,
                start_token: None,
                launched_at_ms: 0,
                app: String::new(),
                instance: String::new(),
            }),
            _ => RecordState::Unreadable {
                reason: json_error.to_string(),
            },
        },
    }
}

/// Writes `record` to `path` atomically with owner-only permissions.
///
/// Data is flushed and fsync'd before the temporary file is renamed into
/// place so readers never observe a partially written record.
///
/// # Errors
///
/// Returns [`RecordError`] when the record cannot be serialised or written.
pub fn write_record(path: &Path, record: &PidRecord) -> Result<(), RecordError> {
    let mut payload = serde_json::to_vec(record)?;
    payload.push(b'\n');
    atomic_write(path, &payload).map_err(|source| RecordError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        target: RECORD_TARGET,
        pid = record.pid,
        file = %path.display(),
        "pid record written"
    );
    Ok(())
}

/// Removes the record at `path`, returning whether one existed.
///
/// # Errors
///
/// Returns [`RecordError::Remove`] for IO failures other than a missing file.
pub fn remove_record(path: &Path) -> Result<bool, RecordError> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(target: RECORD_TARGET, file = %path.display(), "pid record removed");
            Ok(true)
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(RecordError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "record path did not have a parent directory",
        )
    })?;
    fs::create_dir_all(directory)?;

    let mut builder = Builder::new();
    builder.prefix(
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("tend"),
    );
    #[cfg(unix)]
    {
        builder.permissions(fs::Permissions::from_mode(0o600));
    }

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn state_dir() -> TempDir {
        TempDir::new().expect("create state directory")
    }

    fn sample() -> PidRecord {
        PidRecord {
            pid: 4242,
            start_token: Some(987_654),
            launched_at_ms: 1_700_000_000_000,
            app: String::from("shop"),
            instance: String::from("router"),
        }
    }

    #[rstest]
    fn written_record_reads_back_and_creates_parents(state_dir: TempDir) {
        let path = state_dir.path().join("run/shop/router/router.pid");
        write_record(&path, &sample()).expect("write record");
        assert_eq!(
            read_record(&path).expect("read record"),
            RecordState::Present(sample())
        );
    }

    #[cfg(unix)]
    #[rstest]
    fn record_is_owner_only(state_dir: TempDir) {
        let path = state_dir.path().join("router.pid");
        write_record(&path, &sample()).expect("write record");
        let mode = fs::metadata(&path).expect("stat record").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[rstest]
    fn missing_record_is_reported(state_dir: TempDir) {
        let path = state_dir.path().join("absent.pid");
        assert_eq!(
            read_record(&path).expect("read record"),
            RecordState::Missing
        );
    }

    #[rstest]
    #[case::garbage("not a record")]
    #[case::truncated("{\"pid\": 12")]
    #[case::zero("0")]
    fn unparsable_record_is_unreadable(state_dir: TempDir, #[case] contents: &str) {
        let path = state_dir.path().join("broken.pid");
        fs::write(&path, contents).expect("write fixture");
        let state = read_record(&path).expect("read record");
        assert!(
            matches!(state, RecordState::Unreadable { .. }),
            "unexpected state {state:?}"
        );
    }

    #[rstest]
    fn bare_pid_is_accepted_without_token(state_dir: TempDir) {
        let path = state_dir.path().join("legacy.pid");
        fs::write(&path, "31337\n").expect("write fixture");
        let RecordState::Present(record) = read_record(&path).expect("read record") else {
            panic!("expected a record");
        };
        assert_eq!(record.pid, 31337);
        assert_eq!(record.start_token, None);
    }

    #[rstest]
    fn removal_is_idempotent(state_dir: TempDir) {
        let path = state_dir.path().join("router.pid");
        write_record(&path, &sample()).expect("write record");
        assert!(remove_record(&path).expect("first removal"));
        assert!(!remove_record(&path).expect("second removal"));
    }

    #[rstest]
    fn new_record_uses_app_name_for_single_instances() {
        let record = PidRecord::new(&InstanceId::single("solo"), 7, None);
        assert_eq!(record.instance, "solo");
        assert!(record.launched_at_ms > 0);
    }
}
