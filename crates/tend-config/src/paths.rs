//! Derives the on-disk locations of per-instance state.
//!
//! PID records, console sockets and logs live under the run and log
//! directories. Both `start` and `status` must agree on the layout, so every
//! path is computed here from the shared configuration.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

const PID_EXTENSION: &str = "pid";
const CONSOLE_EXTENSION: &str = "control";
const LOG_EXTENSION: &str = "log";

/// Resolved state directories for one supervisor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    apps_root: PathBuf,
    run_root: PathBuf,
    log_root: PathBuf,
}

/// Files owned by a single instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePaths {
    /// PID record written after a successful launch.
    pub pid_path: PathBuf,
    /// Log file receiving the instance's stdout and stderr.
    pub log_path: PathBuf,
    /// Console socket path advertised to the instance.
    pub console_path: PathBuf,
}

impl StatePaths {
    /// Resolves state paths against an explicit base directory.
    ///
    /// Relative application directories are joined onto `base`; relative run
    /// and log directories are joined onto the application directory.
    #[must_use]
    pub fn resolve(config: &Config, base: &Path) -> Self {
        let apps_root = absolutise(base, config.instances_enabled().as_std_path());
        let run_root = absolutise(&apps_root, config.run_dir().as_std_path());
        let log_root = absolutise(&apps_root, config.log_dir().as_std_path());
        Self {
            apps_root,
            run_root,
            log_root,
        }
    }

    /// Directory holding the enabled applications.
    #[must_use]
    pub fn apps_root(&self) -> &Path {
        self.apps_root.as_path()
    }

    /// Root of the run directory tree.
    #[must_use]
    pub fn run_root(&self) -> &Path {
        self.run_root.as_path()
    }

    /// Root of the log directory tree.
    #[must_use]
    pub fn log_root(&self) -> &Path {
        self.log_root.as_path()
    }

    /// Computes the files owned by `app` or one of its named instances.
    ///
    /// Single-instance applications keep their files directly under the
    /// application's directory; named instances get a subdirectory each.
    #[must_use]
    pub fn instance(&self, app: &str, instance: Option<&str>) -> InstancePaths {
        let (run_dir, log_dir, stem) = match instance {
            Some(name) => (
                self.run_root.join(app).join(name),
                self.log_root.join(app).join(name),
                name,
            ),
            None => (self.run_root.join(app), self.log_root.join(app), app),
        };
        InstancePaths {
            pid_path: run_dir.join(format!("{stem}.{PID_EXTENSION}")),
            console_path: run_dir.join(format!("{stem}.{CONSOLE_EXTENSION}")),
            log_path: log_dir.join(format!("{stem}.{LOG_EXTENSION}")),
        }
    }
}

fn absolutise(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else if path == Path::new(".") {
        base.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Errors raised while deriving state paths.
#[derive(Debug, Error)]
pub enum StatePathsError {
    /// The process working directory could not be read.
    #[error("failed to determine the working directory: {0}")]
    WorkingDirectory(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};

    #[fixture]
    fn paths() -> StatePaths {
        StatePaths::resolve(&Config::default(), Path::new("/srv/apps"))
    }

    #[rstest]
    fn relative_directories_nest_under_the_apps_root(paths: StatePaths) {
        assert_eq!(paths.apps_root(), Path::new("/srv/apps"));
        assert_eq!(paths.run_root(), Path::new("/srv/apps/var/run"));
        assert_eq!(paths.log_root(), Path::new("/srv/apps/var/log"));
    }

    #[rstest]
    fn named_instances_get_their_own_directory(paths: StatePaths) {
        let files = paths.instance("shop", Some("router"));
        assert_eq!(
            files.pid_path,
            PathBuf::from("/srv/apps/var/run/shop/router/router.pid")
        );
        assert_eq!(
            files.console_path,
            PathBuf::from("/srv/apps/var/run/shop/router/router.control")
        );
        assert_eq!(
            files.log_path,
            PathBuf::from("/srv/apps/var/log/shop/router/router.log")
        );
    }

    #[rstest]
    fn single_instance_files_are_named_after_the_app(paths: StatePaths) {
        let files = paths.instance("solo", None);
        assert_eq!(files.pid_path, PathBuf::from("/srv/apps/var/run/solo/solo.pid"));
        assert_eq!(files.log_path, PathBuf::from("/srv/apps/var/log/solo/solo.log"));
    }

    #[rstest]
    fn absolute_run_directory_is_kept() {
        let config = Config {
            run_dir: Some(Utf8PathBuf::from("/run/tend")),
            instances_enabled: Some(Utf8PathBuf::from("apps")),
            ..Config::default()
        };
        let paths = StatePaths::resolve(&config, Path::new("/home/ops"));
        assert_eq!(paths.apps_root(), Path::new("/home/ops/apps"));
        assert_eq!(paths.run_root(), Path::new("/run/tend"));
        assert_eq!(paths.log_root(), Path::new("/home/ops/apps/var/log"));
    }
}
