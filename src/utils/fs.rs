//! Filesystem helpers shared across modules.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::other(format!("creating directory {}: {e}", path.display())))
}

/// Resolve a possibly-relative path against the current working directory.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path))
}

/// Look up an executable by name in the `PATH` search path.
pub fn lookup_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;

    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    None
}
