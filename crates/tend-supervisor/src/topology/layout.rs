//! Serde model of `instances.toml` and `app.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::TopologyError;

/// Contents of `instances.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct LayoutFile {
    #[serde(default)]
    pub(super) defaults: InstanceOverrides,
    #[serde(default, rename = "instance")]
    pub(super) instances: Vec<InstanceEntry>,
}

/// One `[[instance]]` table.
#[derive(Debug, Deserialize)]
pub(super) struct InstanceEntry {
    pub(super) name: String,
    #[serde(flatten)]
    pub(super) overrides: InstanceOverrides,
}

/// Per-instance settings; also the whole of `app.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub(super) struct InstanceOverrides {
    pub(super) entry_point: Option<String>,
    pub(super) working_dir: Option<String>,
    pub(super) ready_markers: Option<Vec<String>>,
    #[serde(default)]
    pub(super) env: BTreeMap<String, String>,
    pub(super) args: Option<Vec<String>>,
}

impl InstanceOverrides {
    /// Fills unset fields from `defaults`; environment maps are merged with
    /// this instance's values winning.
    pub(super) fn layered_over(self, defaults: &Self) -> Self {
        let mut env = defaults.env.clone();
        env.extend(self.env);
        Self {
            entry_point: self.entry_point.or_else(|| defaults.entry_point.clone()),
            working_dir: self.working_dir.or_else(|| defaults.working_dir.clone()),
            ready_markers: self
                .ready_markers
                .or_else(|| defaults.ready_markers.clone()),
            env,
            args: self.args.or_else(|| defaults.args.clone()),
        }
    }
}

pub(super) fn read_layout<T: DeserializeOwned>(path: &Path) -> Result<T, TopologyError> {
    let text = fs::read_to_string(path).map_err(|source| TopologyError::ReadLayout {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| TopologyError::ParseApplication {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}
