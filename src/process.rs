//! Process runner.
//!
//! Executes compiler invocations through the platform shell and captures
//! their exit status and output. A non-zero or missing exit code is a normal
//! result here: negative cases expect exactly that.

use crate::platform;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::process::{Child, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Error type for process execution.
///
/// Only failures of the harness itself end up here; whatever the invoked
/// program does is reported through [`CommandResult`].
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` timed out after {}s", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },
}

/// A command and its arguments, as a human would type them into a shell.
///
/// Arguments are raw shell fragments: they are joined with single spaces and
/// never re-quoted, so `"--bin --output-dir './tmp/'"` is a valid argument.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CommandInvocation {
    command: String,
    arguments: Vec<String>,
}

impl CommandInvocation {
    pub fn new<I, S>(command: impl Into<String>, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// The line handed to the shell.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.arguments.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Outcome of a single invocation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CommandResult {
    /// Exit code, `None` if the process did not terminate normally.
    pub exit_code: Option<i32>,
    /// Trimmed stdout if non-empty, otherwise trimmed stderr.
    pub output: String,
}

impl CommandResult {
    /// Merge the two streams, stdout taking priority.
    pub fn from_streams(exit_code: Option<i32>, stdout: &str, stderr: &str) -> Self {
        let stdout = stdout.trim();
        let output = if stdout.is_empty() {
            stderr.trim()
        } else {
            stdout
        };
        Self {
            exit_code,
            output: output.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run an invocation from the current directory and wait for it to finish.
pub fn run(invocation: &CommandInvocation) -> Result<CommandResult, ProcessError> {
    run_in(invocation, None, None)
}

/// Run an invocation, optionally from `cwd` and with a timeout.
///
/// Without a timeout the call blocks until the child exits, however long
/// that takes.
pub fn run_in(
    invocation: &CommandInvocation,
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<CommandResult, ProcessError> {
    let line = invocation.command_line();
    tracing::debug!(command = %line, cwd = ?cwd, "running");

    let mut cmd = platform::current().shell(&line);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        command: line.clone(),
        source,
    })?;

    let (status, stdout, stderr) = match timeout {
        None => {
            let output = child
                .wait_with_output()
                .map_err(|source| ProcessError::Wait {
                    command: line.clone(),
                    source,
                })?;
            (output.status, output.stdout, output.stderr)
        }
        Some(timeout) => wait_with_timeout(child, &line, timeout)?,
    };

    let result = CommandResult::from_streams(
        status.code(),
        &String::from_utf8_lossy(&stdout),
        &String::from_utf8_lossy(&stderr),
    );
    tracing::debug!(command = %line, exit_code = ?result.exit_code, "finished");
    Ok(result)
}

fn wait_with_timeout(
    mut child: Child,
    line: &str,
    timeout: Duration,
) -> Result<(ExitStatus, Vec<u8>, Vec<u8>), ProcessError> {
    // Drain both pipes while polling, a chatty child would block on a full pipe otherwise.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProcessError::Timeout {
                        command: line.to_string(),
                        timeout,
                    });
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(source) => {
                return Err(ProcessError::Wait {
                    command: line.to_string(),
                    source,
                });
            }
        }
    };

    Ok((status, collect(stdout), collect(stderr)))
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = reader.read_to_end(&mut buffer);
        buffer
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}
