//! Temporary workspaces for cases that write compiler artifacts.
//!
//! Each workspace is a uniquely named directory under the output root.
//! Cases release their workspace explicitly; every workspace is also
//! recorded in a process-wide registry, and [`cleanup_all`] removes the ones
//! a case never got around to releasing.

use crate::platform::{self, PermissionMode};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

/// Template used when a case asks for a workspace without naming one.
pub const DEFAULT_TEMPLATE: &str = "tmp-XXXXXX";

/// Shortest run of `X` treated as the random segment of a template.
const MIN_RANDOM_LEN: usize = 3;

static ACTIVE: LazyLock<Mutex<BTreeSet<PathBuf>>> = LazyLock::new(Default::default);

fn registry() -> MutexGuard<'static, BTreeSet<PathBuf>> {
    ACTIVE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Error type for workspace creation.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error(
        "invalid workspace template {0:?}: expected a file name with a run of at least three 'X' characters"
    )]
    InvalidTemplate(String),
    #[error("failed to create output root {}: {source}", root.display())]
    Root {
        root: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create workspace in {}: {source}", root.display())]
    Create {
        root: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A temporary directory owned by one case.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Create a workspace under `root`, creating `root` first if needed.
    ///
    /// The first run of three or more `X` in `template` is replaced with
    /// random characters, e.g. `tmp-XXXXXX` becomes `tmp-a8Kq2z`.
    pub fn create(root: &Path, template: &str) -> Result<Self, WorkspaceError> {
        let (prefix, random_len, suffix) = split_template(template)?;

        fs::create_dir_all(root).map_err(|source| WorkspaceError::Root {
            root: root.to_path_buf(),
            source,
        })?;

        let path = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .rand_bytes(random_len)
            .tempdir_in(root)
            .map_err(|source| WorkspaceError::Create {
                root: root.to_path_buf(),
                source,
            })?
            .keep();

        registry().insert(path.clone());
        tracing::debug!(path = %path.display(), "workspace created");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the workspace recursively.
    ///
    /// Safe to call any number of times, and when the directory is already
    /// gone. A workspace that cannot be removed stays registered for
    /// [`cleanup_all`].
    pub fn release(&self) {
        if remove(&self.path) {
            registry().remove(&self.path);
        }
    }
}

/// Whether `path` is a workspace that has not been released yet.
#[cfg(test)]
fn is_active(path: &Path) -> bool {
    registry().contains(path)
}

/// Remove every workspace that was never released.
///
/// Returns the number of workspaces removed.
pub fn cleanup_all() -> usize {
    cleanup_matching(|_| true)
}

/// Remove unreleased workspaces located under `root`.
pub fn cleanup_under(root: &Path) -> usize {
    cleanup_matching(|path| path.starts_with(root))
}

fn cleanup_matching(filter: impl Fn(&Path) -> bool) -> usize {
    let leaked: Vec<PathBuf> = {
        let mut active = registry();
        let leaked: Vec<PathBuf> = active.iter().filter(|p| filter(p)).cloned().collect();
        for path in &leaked {
            active.remove(path);
        }
        leaked
    };

    let mut removed = 0;
    for path in &leaked {
        if remove(path) {
            removed += 1;
        } else {
            registry().insert(path.clone());
        }
    }
    if removed > 0 {
        tracing::info!(removed, "removed leaked workspaces");
    }
    removed
}

/// Removes all workspaces still registered when dropped.
///
/// Hold one for the lifetime of a run so that early returns and panics
/// still clean up.
#[derive(Debug, Default)]
pub struct CleanupGuard;

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        cleanup_all();
    }
}

/// Delete `path`, restoring write access and retrying once if needed.
fn remove(path: &Path) -> bool {
    match fs::remove_dir_all(path) {
        Ok(()) => return true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
        Err(e) => {
            tracing::debug!(path = %path.display(), "retrying removal with full access: {e}");
        }
    }

    platform::set_permission(path, PermissionMode::AllAccess);
    match fs::remove_dir_all(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to remove workspace: {e}");
            false
        }
    }
}

/// Check that `template` names a workspace [`Workspace::create`] can make.
pub fn validate_template(template: &str) -> Result<(), WorkspaceError> {
    split_template(template).map(|_| ())
}

/// Split a template into prefix, random length and suffix.
fn split_template(template: &str) -> Result<(&str, usize, &str), WorkspaceError> {
    let invalid = || WorkspaceError::InvalidTemplate(template.to_string());
    if template.contains(['/', '\\']) {
        return Err(invalid());
    }

    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'X' {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i] == b'X' {
            i += 1;
        }
        if i - start >= MIN_RANDOM_LEN {
            return Ok((&template[..start], i - start, &template[i..]));
        }
    }
    Err(invalid())
}
