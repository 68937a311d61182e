//! Application discovery and instance topology.
//!
//! An application is either a single script, a directory with an entry point,
//! or a directory whose `instances.toml` enumerates several named instances.
//! Resolution turns an application root into ordered [`InstanceDescriptor`]s
//! carrying every path and override the lifecycle needs, so later stages never
//! touch layout files again.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use tend_config::{Config, StatePaths};
use thiserror::Error;
use tracing::debug;

mod layout;
mod selector;

use layout::{InstanceOverrides, LayoutFile, read_layout};
pub use selector::{Selector, SelectorError};

use crate::TOPOLOGY_TARGET;

/// File enumerating the instances of a multi-instance application.
pub const INSTANCES_FILE: &str = "instances.toml";
/// Optional override file for single-instance directory applications.
pub const APP_FILE: &str = "app.toml";

/// Identifies one instance: the application plus an optional instance name.
///
/// Single-instance applications have no instance name and display as `app`;
/// named instances display as `app:instance`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    app: String,
    instance: Option<String>,
}

impl InstanceId {
    /// Identifier of a named instance.
    #[must_use]
    pub fn named(app: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            instance: Some(instance.into()),
        }
    }

    /// Identifier of a single-instance application.
    #[must_use]
    pub fn single(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            instance: None,
        }
    }

    /// Application name.
    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Instance name, absent for single-instance applications.
    #[must_use]
    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    /// Instance name, falling back to the application name.
    #[must_use]
    pub fn instance_or_app(&self) -> &str {
        self.instance.as_deref().unwrap_or(&self.app)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(formatter, "{}:{instance}", self.app),
            None => formatter.write_str(&self.app),
        }
    }
}

/// Compiled readiness marker patterns; a log line matching any is a signal.
#[derive(Debug, Clone)]
pub struct ReadinessMarkers(Vec<Regex>);

impl ReadinessMarkers {
    /// Compiles `patterns`, returning `Ok(None)` when there are none.
    ///
    /// # Errors
    ///
    /// Returns the first pattern that fails to compile together with the
    /// regex error.
    pub fn compile<S: AsRef<str>>(
        patterns: &[S],
    ) -> Result<Option<Self>, (String, regex::Error)> {
        if patterns.is_empty() {
            return Ok(None);
        }
        let compiled = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern.as_ref()).map_err(|error| (pattern.as_ref().to_owned(), error))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Self(compiled)))
    }

    /// Whether `line` matches any marker.
    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        self.0.iter().any(|marker| marker.is_match(line))
    }
}

/// Everything the lifecycle needs to operate on one instance.
#[derive(Debug, Clone)]
pub struct InstanceDescriptor {
    /// Instance identity.
    pub id: InstanceId,
    /// Working directory of the launched process.
    pub working_dir: PathBuf,
    /// Script passed to the runtime binary.
    pub entry_point: PathBuf,
    /// Extra arguments following the entry point.
    pub args: Vec<String>,
    /// Environment overrides, applied after the supervisor's own variables.
    pub env: Vec<(String, String)>,
    /// PID record location.
    pub pid_file_path: PathBuf,
    /// Log stream location.
    pub log_file_path: PathBuf,
    /// Console socket location advertised to the instance.
    pub console_socket_path: PathBuf,
    /// Readiness markers; `None` means the instance is ready once running.
    pub readiness: Option<ReadinessMarkers>,
}

/// An application and its ordered instances.
#[derive(Debug, Clone)]
pub struct Application {
    /// Application name.
    pub name: String,
    /// Directory or script the application was resolved from.
    pub source: PathBuf,
    /// Instances in declaration order.
    pub instances: Vec<InstanceDescriptor>,
}

/// Errors raised while resolving applications and selectors.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The path holds neither an instance list nor an entry point.
    #[error("'{path}' is not an application: no {INSTANCES_FILE} or entry point found")]
    NotAnApplication {
        /// Inspected path.
        path: PathBuf,
    },
    /// A layout file could not be read.
    #[error("failed to read '{path}': {source}")]
    ReadLayout {
        /// Layout file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A layout file is malformed.
    #[error("failed to parse '{path}': {source}")]
    ParseApplication {
        /// Layout file path.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: Box<toml::de::Error>,
    },
    /// The instance list is empty.
    #[error("application '{app}' declares no instances")]
    EmptyTopology {
        /// Application name.
        app: String,
    },
    /// Two instances share a name.
    #[error("application '{app}' declares instance '{instance}' more than once")]
    InstanceNameConflict {
        /// Application name.
        app: String,
        /// Duplicated instance name.
        instance: String,
    },
    /// An instance name cannot be used in identifiers or paths.
    #[error("application '{app}' has an invalid instance name '{instance}': {reason}")]
    InvalidInstanceName {
        /// Application name.
        app: String,
        /// Offending name.
        instance: String,
        /// Why the name was rejected.
        reason: &'static str,
    },
    /// A readiness marker is not a valid regular expression.
    #[error("application '{app}' has an invalid readiness marker '{pattern}': {source}")]
    InvalidMarker {
        /// Application name.
        app: String,
        /// Offending pattern.
        pattern: String,
        /// Underlying regex error.
        #[source]
        source: Box<regex::Error>,
    },
    /// The applications directory could not be listed.
    #[error("failed to list applications in '{path}': {source}")]
    ReadAppsRoot {
        /// Applications directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Two entries of the applications directory resolve to the same name.
    #[error("application name '{name}' is ambiguous: both '{first}' and '{second}' define it")]
    DuplicateApplication {
        /// Application name.
        name: String,
        /// First definition.
        first: PathBuf,
        /// Second definition.
        second: PathBuf,
    },
    /// No application has the requested name.
    #[error("can't find an application '{name}' in '{root}'")]
    UnknownApplication {
        /// Requested name.
        name: String,
        /// Applications directory searched.
        root: PathBuf,
    },
    /// The application has no instance with the requested name.
    #[error("application '{app}' has no instance '{instance}'")]
    UnknownInstance {
        /// Application name.
        app: String,
        /// Requested instance.
        instance: String,
    },
}

/// Settings that shape resolution, taken from the supervisor configuration.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Entry point file name inside directory applications.
    pub entry_point: String,
    /// Extension of single-file applications, without the dot.
    pub script_extension: String,
}

impl From<&Config> for ResolverSettings {
    fn from(config: &Config) -> Self {
        Self {
            entry_point: config.entry_point().to_owned(),
            script_extension: config.script_extension().to_owned(),
        }
    }
}

/// Resolves applications under the configured applications directory.
#[derive(Debug, Clone)]
pub struct TopologyResolver {
    settings: ResolverSettings,
    paths: StatePaths,
}

impl TopologyResolver {
    /// Creates a resolver over `paths.apps_root()`.
    #[must_use]
    pub const fn new(settings: ResolverSettings, paths: StatePaths) -> Self {
        Self { settings, paths }
    }

    /// State paths used for per-instance artefacts.
    #[must_use]
    pub const fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Resolves the application rooted at `source` under the name `name`.
    ///
    /// `source` is either an application directory or a single script.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError`] when the layout is missing, malformed, empty,
    /// or declares conflicting instance names.
    pub fn resolve(&self, name: &str, source: &Path) -> Result<Application, TopologyError> {
        let instances = if source.is_file() {
            vec![self.single_instance(name, source.parent().unwrap_or(source), source, None)?]
        } else {
            self.resolve_directory(name, source)?
        };
        debug!(
            target: TOPOLOGY_TARGET,
            app = name,
            instances = instances.len(),
            source = %source.display(),
            "resolved application"
        );
        Ok(Application {
            name: name.to_owned(),
            source: source.to_path_buf(),
            instances,
        })
    }

    /// Resolves every application in the applications directory, by name.
    ///
    /// When the directory is itself an application it is the only result.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError`] when the directory cannot be listed or an
    /// application in it fails to resolve.
    pub fn discover(&self) -> Result<Vec<Application>, TopologyError> {
        let root = self.paths.apps_root();
        if let Some(name) = self.root_application_name() {
            return Ok(vec![self.resolve(&name, root)?]);
        }
        let mut sources = self.candidate_sources()?;
        sources.sort_by(|left, right| left.0.cmp(&right.0));
        for pair in sources.windows(2) {
            if let [(first_name, first), (second_name, second)] = pair
                && first_name == second_name
            {
                return Err(TopologyError::DuplicateApplication {
                    name: first_name.clone(),
                    first: first.clone(),
                    second: second.clone(),
                });
            }
        }
        sources
            .iter()
            .map(|(name, source)| self.resolve(name, source))
            .collect()
    }

    /// Resolves the instances addressed by `selector`, in topology order.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::UnknownApplication`] or
    /// [`TopologyError::UnknownInstance`] when nothing matches, or any
    /// resolution error of the addressed applications.
    pub fn select(&self, selector: &Selector) -> Result<Vec<InstanceDescriptor>, TopologyError> {
        let Some(app) = selector.app() else {
            return Ok(self
                .discover()?
                .into_iter()
                .flat_map(|application| application.instances)
                .collect());
        };
        let application = self.find(app)?;
        let Some(instance) = selector.instance() else {
            return Ok(application.instances);
        };
        let selected: Vec<_> = application
            .instances
            .into_iter()
            .filter(|descriptor| descriptor.id.instance() == Some(instance))
            .collect();
        if selected.is_empty() {
            return Err(TopologyError::UnknownInstance {
                app: app.to_owned(),
                instance: instance.to_owned(),
            });
        }
        Ok(selected)
    }

    /// Finds and resolves the application called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::UnknownApplication`] when no directory or
    /// script has that name.
    pub fn find(&self, name: &str) -> Result<Application, TopologyError> {
        let root = self.paths.apps_root();
        if let Some(root_name) = self.root_application_name() {
            if root_name == name {
                return self.resolve(name, root);
            }
            return Err(self.unknown_application(name));
        }
        if !is_valid_name(name) {
            return Err(self.unknown_application(name));
        }
        let directory = root.join(name);
        if directory.is_dir() && self.looks_like_application(&directory) {
            return self.resolve(name, &directory);
        }
        let script = root.join(format!("{name}.{}", self.settings.script_extension));
        if script.is_file() {
            return self.resolve(name, &script);
        }
        Err(self.unknown_application(name))
    }

    fn unknown_application(&self, name: &str) -> TopologyError {
        TopologyError::UnknownApplication {
            name: name.to_owned(),
            root: self.paths.apps_root().to_path_buf(),
        }
    }

    fn root_application_name(&self) -> Option<String> {
        let root = self.paths.apps_root();
        if !self.looks_like_application(root) {
            return None;
        }
        root.file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    fn looks_like_application(&self, directory: &Path) -> bool {
        directory.join(INSTANCES_FILE).is_file()
            || directory.join(APP_FILE).is_file()
            || directory.join(&self.settings.entry_point).is_file()
    }

    fn candidate_sources(&self) -> Result<Vec<(String, PathBuf)>, TopologyError> {
        let root = self.paths.apps_root();
        let read_error = |source| TopologyError::ReadAppsRoot {
            path: root.to_path_buf(),
            source,
        };
        let mut sources = Vec::new();
        for entry in fs::read_dir(root).map_err(read_error)? {
            let path = entry.map_err(read_error)?.path();
            if path.is_dir() {
                if self.looks_like_application(&path)
                    && let Some(name) = path.file_name()
                {
                    sources.push((name.to_string_lossy().into_owned(), path));
                }
            } else if path.extension().is_some_and(|extension| {
                extension.to_string_lossy() == self.settings.script_extension
            }) && let Some(stem) = path.file_stem()
            {
                sources.push((stem.to_string_lossy().into_owned(), path));
            }
        }
        Ok(sources)
    }

    fn resolve_directory(
        &self,
        app: &str,
        directory: &Path,
    ) -> Result<Vec<InstanceDescriptor>, TopologyError> {
        let instances_file = directory.join(INSTANCES_FILE);
        if instances_file.is_file() {
            let layout: LayoutFile = read_layout(&instances_file)?;
            return self.multi_instance(app, directory, layout);
        }

        let app_file = directory.join(APP_FILE);
        let overrides = if app_file.is_file() {
            read_layout::<InstanceOverrides>(&app_file)?
        } else {
            InstanceOverrides::default()
        };
        let entry_point = directory.join(
            overrides
                .entry_point
                .as_deref()
                .unwrap_or(&self.settings.entry_point),
        );
        if !entry_point.is_file() {
            return Err(TopologyError::NotAnApplication {
                path: directory.to_path_buf(),
            });
        }
        Ok(vec![self.single_instance(
            app,
            directory,
            &entry_point,
            Some(overrides),
        )?])
    }

    fn single_instance(
        &self,
        app: &str,
        base: &Path,
        entry_point: &Path,
        overrides: Option<InstanceOverrides>,
    ) -> Result<InstanceDescriptor, TopologyError> {
        let id = InstanceId::single(app);
        let overrides = overrides.unwrap_or_default();
        self.descriptor(id, base, entry_point.to_path_buf(), overrides)
    }

    fn multi_instance(
        &self,
        app: &str,
        directory: &Path,
        layout: LayoutFile,
    ) -> Result<Vec<InstanceDescriptor>, TopologyError> {
        if layout.instances.is_empty() {
            return Err(TopologyError::EmptyTopology {
                app: app.to_owned(),
            });
        }
        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(layout.instances.len());
        for entry in layout.instances {
            validate_instance_name(app, &entry.name)?;
            if !seen.insert(entry.name.clone()) {
                return Err(TopologyError::InstanceNameConflict {
                    app: app.to_owned(),
                    instance: entry.name,
                });
            }
            let overrides = entry.overrides.layered_over(&layout.defaults);
            let entry_point = directory.join(
                overrides
                    .entry_point
                    .as_deref()
                    .unwrap_or(&self.settings.entry_point),
            );
            let id = InstanceId::named(app, entry.name);
            descriptors.push(self.descriptor(id, directory, entry_point, overrides)?);
        }
        Ok(descriptors)
    }

    fn descriptor(
        &self,
        id: InstanceId,
        base: &Path,
        entry_point: PathBuf,
        overrides: InstanceOverrides,
    ) -> Result<InstanceDescriptor, TopologyError> {
        let readiness = ReadinessMarkers::compile(
            overrides.ready_markers.as_deref().unwrap_or_default(),
        )
        .map_err(|(pattern, source)| TopologyError::InvalidMarker {
            app: id.app().to_owned(),
            pattern,
            source: Box::new(source),
        })?;
        let working_dir = overrides
            .working_dir
            .as_deref()
            .map_or_else(|| base.to_path_buf(), |dir| base.join(dir));
        let files = self.paths.instance(id.app(), id.instance());
        Ok(InstanceDescriptor {
            working_dir,
            entry_point,
            args: overrides.args.unwrap_or_default(),
            env: overrides.env.into_iter().collect(),
            pid_file_path: files.pid_path,
            log_file_path: files.log_path,
            console_socket_path: files.console_path,
            readiness,
            id,
        })
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains([':', '/', '\\']) && name != "." && name != ".."
}

fn validate_instance_name(app: &str, name: &str) -> Result<(), TopologyError> {
    let reason = if name.is_empty() {
        "the name is empty"
    } else if name.contains(':') {
        "':' separates application and instance"
    } else if name.contains(['/', '\\']) || name == "." || name == ".." {
        "the name must not address another directory"
    } else {
        return Ok(());
    };
    Err(TopologyError::InvalidInstanceName {
        app: app.to_owned(),
        instance: name.to_owned(),
        reason,
    })
}
