//! Settings of a storage root and discovery of the root itself.
//!
//! Settings are layered: `<root>/config.toml` first, then environment
//! variables such as `TENSORLAB__LOG_FILTER` or `TENSORLAB__PROJECT__BUILD`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{Result, TensorlabError};
use crate::files;

/// Environment variable naming the storage root.
pub const ROOT_ENV: &str = "TENSORLAB_ROOT";
/// Directory name searched for when no root is given.
pub const ROOT_MARKER: &str = ".tensorlab";

const TEMPLATE: &str = "\
# Filter for log output, in RUST_LOG syntax
log_filter = \"warn\"

[project]
# Shell command building a model. Receives TENSORLAB_ATTRIBUTES (JSON)
# and TENSORLAB_MODEL_DATA.
# build = \"python train.py\"
# Shell command executing a run. Also receives TENSORLAB_RUN_DATA.
# run = \"python evaluate.py\"
";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub log_filter: String,
    pub project: ProjectSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectSettings {
    pub build: Option<String>,
    pub run: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_filter: "warn".to_string(),
            project: ProjectSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(root: &Path) -> Result<Settings> {
        let settings = Config::builder()
            .add_source(File::from(files::config_path(root)).required(false))
            .add_source(Environment::with_prefix("TENSORLAB").prefix_separator("__").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Writes a commented settings file unless one exists already.
    pub fn write_template(root: &Path) -> Result<()> {
        let path = files::config_path(root);
        if !path.exists() {
            fs::write(path, TEMPLATE)?;
        }
        Ok(())
    }
}

/// The storage root: `TENSORLAB_ROOT` if set, else the nearest directory
/// named `.tensorlab` in `start` or one of its ancestors.
pub fn find_root(start: &Path) -> Result<PathBuf> {
    if let Some(root) = env::var_os(ROOT_ENV) {
        return Ok(PathBuf::from(root));
    }
    start
        .ancestors()
        .map(|dir| dir.join(ROOT_MARKER))
        .find(|candidate| candidate.is_dir())
        .ok_or_else(|| {
            TensorlabError::storage_instantiation(format!(
                "No {} directory found in {} or its parents (set {} to choose one)",
                ROOT_MARKER,
                start.display(),
                ROOT_ENV
            ))
        })
}
