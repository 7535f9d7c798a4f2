use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::PrepareError;

/// A directory that exists and was empty when [`prepare_dir`] returned.
///
/// Only `prepare_dir` constructs this, so holding one means the clone target
/// is not a partial or stale checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyDirectory(PathBuf);

impl ReadyDirectory {
    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn into_path(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for ReadyDirectory {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Make `path` an existing, empty directory.
///
/// - Missing: created, including parents.
/// - Existing and empty: left untouched.
/// - Existing with entries: removed recursively and recreated.
/// - Existing but not a directory: rejected, nothing is deleted.
///
/// # Errors
/// [`PrepareError::CreateFailed`] when the directory cannot be created,
/// [`PrepareError::ResetFailed`] when a non-empty directory cannot be
/// reset, and [`PrepareError::NotADirectory`] for files.
pub fn prepare_dir(path: &Path) -> Result<ReadyDirectory, PrepareError> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "creating directory");
            fs::create_dir_all(path).map_err(|source| PrepareError::CreateFailed {
                path: path.to_path_buf(),
                source,
            })?;
            return Ok(ReadyDirectory(path.to_path_buf()));
        }
        Err(source) => {
            return Err(PrepareError::CreateFailed {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if !meta.is_dir() {
        return Err(PrepareError::NotADirectory {
            path: path.to_path_buf(),
        });
    }

    let reset_failed = |source| PrepareError::ResetFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(path).map_err(reset_failed)?;
    if entries.next().is_none() {
        debug!(path = %path.display(), "directory already empty");
        return Ok(ReadyDirectory(path.to_path_buf()));
    }

    info!(path = %path.display(), "directory not empty, resetting");
    fs::remove_dir_all(path).map_err(reset_failed)?;
    fs::create_dir_all(path).map_err(reset_failed)?;
    Ok(ReadyDirectory(path.to_path_buf()))
}
