//! On-disk layout of a storage root.
//!
//! ```text
//! <root>/db.sqlite3
//! <root>/config.toml
//! <root>/models/<uid>/
//! <root>/runs/<uid>/
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;

pub const DB_FILE: &str = "db.sqlite3";
pub const CONFIG_FILE: &str = "config.toml";
pub const MODELS_DIR: &str = "models";
pub const RUNS_DIR: &str = "runs";

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn models_dir(root: &Path) -> PathBuf {
    root.join(MODELS_DIR)
}

pub fn runs_dir(root: &Path) -> PathBuf {
    root.join(RUNS_DIR)
}

pub fn model_data_path(root: &Path, uid: &str) -> PathBuf {
    models_dir(root).join(uid)
}

pub fn run_data_path(root: &Path, uid: &str) -> PathBuf {
    runs_dir(root).join(uid)
}

/// Creates `path` if missing and checks that it can be written to.
/// Calling it again on an existing directory is harmless.
pub fn make_dir_writable(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    if fs::metadata(path)?.permissions().readonly() {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{} is not writable", path.display()),
        )
        .into());
    }
    Ok(())
}

pub fn is_storage_exist(root: &Path) -> bool {
    root.is_dir() && db_path(root).is_file() && models_dir(root).is_dir()
}

pub fn create_storage_directory(root: &Path) -> Result<()> {
    make_dir_writable(root)?;
    make_dir_writable(&models_dir(root))?;
    make_dir_writable(&runs_dir(root))
}

/// Removes a model or run data directory. Failures are logged, not returned:
/// by the time this runs the database no longer refers to the directory.
pub fn remove_data_dir(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove data directory"),
    }
}
