//! Host platform operations.
//!
//! Everything that differs between POSIX and Windows hosts (the shell,
//! directory listing, locating programs, permission changes) goes through
//! [`PlatformOps`]. The implementation is chosen once per process by
//! [`current`]; call sites never branch on the host themselves.

use crate::process::{self, CommandInvocation};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::Path;
use std::process::Command;

/// Permission applied to a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Listable but neither writable nor traversable for new entries.
    ReadOnly,
    /// Full access.
    AllAccess,
}

/// Host family, used by cases restricted to one platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Posix,
    Windows,
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformKind::Posix => f.write_str("posix"),
            PlatformKind::Windows => f.write_str("windows"),
        }
    }
}

/// Operations whose implementation depends on the host.
pub trait PlatformOps: Send + Sync {
    fn kind(&self) -> PlatformKind;

    /// A command that runs `line` through the platform shell.
    fn shell(&self, line: &str) -> Command;

    /// A listing of `path`, succeeding only if the path is listable.
    fn listing(&self, path: &Path) -> CommandInvocation;

    /// A lookup of `program` on the search path.
    fn locate(&self, program: &str) -> CommandInvocation;

    /// Change the permissions of `path` and everything below it.
    fn apply_permission(&self, path: &Path, mode: PermissionMode) -> io::Result<()>;
}

/// POSIX hosts: `sh`, `ls`, `which` and mode bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Posix;

/// Windows hosts: `cmd`, `dir`, `where` and ACLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Windows;

#[cfg(windows)]
static CURRENT: Windows = Windows;
#[cfg(not(windows))]
static CURRENT: Posix = Posix;

/// The operations of the host this process runs on.
pub fn current() -> &'static dyn PlatformOps {
    &CURRENT
}

/// Change permissions of a directory tree, logging instead of failing.
///
/// Nothing is tracked: callers restore [`PermissionMode::AllAccess`]
/// themselves during teardown.
pub fn set_permission(path: &Path, mode: PermissionMode) {
    match current().apply_permission(path, mode) {
        Ok(()) => tracing::debug!(path = %path.display(), ?mode, "permissions changed"),
        Err(e) => tracing::warn!(
            path = %path.display(),
            ?mode,
            "failed to change permissions: {e}"
        ),
    }
}

/// Resolve `program` to the path the search path would pick.
pub fn locate_program(program: &str) -> Option<String> {
    let invocation = current().locate(program);
    match process::run(&invocation) {
        Ok(result) if result.success() => result
            .output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(String::from),
        Ok(result) => {
            tracing::debug!(program, output = %result.output, "program not found on search path");
            None
        }
        Err(e) => {
            tracing::warn!(program, "failed to locate program: {e}");
            None
        }
    }
}

impl PlatformOps for Posix {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Posix
    }

    fn shell(&self, line: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(line);
        cmd
    }

    fn listing(&self, path: &Path) -> CommandInvocation {
        CommandInvocation::new("ls", [posix_quote(path)])
    }

    fn locate(&self, program: &str) -> CommandInvocation {
        CommandInvocation::new("which", [program])
    }

    #[cfg(unix)]
    fn apply_permission(&self, path: &Path, mode: PermissionMode) -> io::Result<()> {
        chmod_recursive(path, mode)
    }

    #[cfg(not(unix))]
    fn apply_permission(&self, _path: &Path, _mode: PermissionMode) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "mode bits are not available on this host",
        ))
    }
}

impl PlatformOps for Windows {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Windows
    }

    fn shell(&self, line: &str) -> Command {
        let mut cmd = Command::new("cmd");
        cmd.args(["/d", "/s", "/c"]);
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.raw_arg(format!("\"{line}\""));
        }
        #[cfg(not(windows))]
        cmd.arg(line);
        cmd
    }

    fn listing(&self, path: &Path) -> CommandInvocation {
        CommandInvocation::new("dir", [windows_quote(path)])
    }

    fn locate(&self, program: &str) -> CommandInvocation {
        CommandInvocation::new("where", [program])
    }

    fn apply_permission(&self, path: &Path, mode: PermissionMode) -> io::Result<()> {
        let target = windows_quote(path);
        let invocations = match mode {
            PermissionMode::ReadOnly => vec![CommandInvocation::new(
                "icacls",
                [
                    target.as_str(),
                    "/deny",
                    "\"Everyone:(OI)(CI)(W)\"",
                    "/grant:r",
                    "\"Everyone:(OI)(CI)(R)\"",
                ],
            )],
            // Deny entries win over grants, so they have to go first.
            PermissionMode::AllAccess => vec![
                CommandInvocation::new("icacls", [target.as_str(), "/remove:d", "Everyone"]),
                CommandInvocation::new(
                    "icacls",
                    [target.as_str(), "/grant", "\"Everyone:(OI)(CI)(F)\""],
                ),
            ],
        };

        for invocation in &invocations {
            let result = process::run(invocation).map_err(io::Error::other)?;
            if !result.success() {
                return Err(io::Error::other(format!(
                    "`{invocation}` exited with {:?}: {}",
                    result.exit_code, result.output
                )));
            }
        }
        Ok(())
    }
}

/// Single-quote a path for `sh`.
fn posix_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

fn windows_quote(path: &Path) -> String {
    format!("\"{}\"", path.display())
}

/// Recursive equivalent of `chmod -R -wx` / `chmod -R +wx`.
///
/// Read bits are left alone so a read-only directory stays listable.
/// Children are visited before their parent when revoking and after it when
/// granting, otherwise the walk would lock itself out.
#[cfg(unix)]
fn chmod_recursive(path: &Path, mode: PermissionMode) -> io::Result<()> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    const WRITE_EXECUTE: u32 = 0o333;

    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }

    let current = metadata.permissions().mode() & 0o7777;
    let updated = match mode {
        PermissionMode::ReadOnly => current & !WRITE_EXECUTE,
        PermissionMode::AllAccess => current | WRITE_EXECUTE,
    };
    let apply = || fs::set_permissions(path, fs::Permissions::from_mode(updated));

    if !metadata.is_dir() {
        return apply();
    }

    if mode == PermissionMode::AllAccess {
        apply()?;
    }
    for entry in fs::read_dir(path)? {
        chmod_recursive(&entry?.path(), mode)?;
    }
    if mode == PermissionMode::ReadOnly {
        apply()?;
    }
    Ok(())
}
