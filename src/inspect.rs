//! Existence and emptiness checks for compiler artifacts.

use crate::platform;
use crate::process;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for artifact checks.
#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("file/path {} is not found", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to inspect {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether `path` exists and can be listed.
///
/// The native check alone reports stale entries for freshly deleted or
/// permission-denied paths on some hosts, so a listing command has to agree.
pub fn exists(path: &Path) -> bool {
    path.exists() && is_listable(path)
}

fn is_listable(path: &Path) -> bool {
    match process::run(&platform::current().listing(path)) {
        Ok(result) => result.success(),
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to list path: {e}");
            false
        }
    }
}

/// Whether a file has no content, or a directory has no entries.
///
/// Fails with [`InspectError::NotFound`] if the path does not [`exists`].
pub fn is_empty(path: &Path) -> Result<bool, InspectError> {
    if !exists(path) {
        return Err(InspectError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let io_error = |source| InspectError::Io {
        path: path.to_path_buf(),
        source,
    };
    let metadata = fs::metadata(path).map_err(io_error)?;
    if metadata.is_dir() {
        let mut entries = fs::read_dir(path).map_err(io_error)?;
        Ok(entries.next().is_none())
    } else {
        Ok(metadata.len() == 0)
    }
}
