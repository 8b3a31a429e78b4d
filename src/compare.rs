//! Comparison of written artifacts with captured CLI output.

use std::fs;
use std::io;
use std::path::Path;

/// Whether the contents of `file` and `cli_output` agree.
///
/// Agreement is containment in either direction, not equality: the CLI
/// surrounds the artifact with banner lines, and the file may carry a
/// trailing newline the captured output lost to trimming.
pub fn same_content(file: &Path, cli_output: &str) -> io::Result<bool> {
    let file_output = fs::read_to_string(file)?;
    tracing::debug!(file = %file.display(), %file_output, %cli_output, "comparing output");
    Ok(contains_either(&file_output, cli_output))
}

/// Whether either string contains the other.
pub fn contains_either(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}
