//! Compiler version detection.

use crate::process::{self, CommandInvocation};
use semver::Version;

/// Error type for version detection.
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("failed to run '{command}': {source}")]
    Run {
        command: String,
        #[source]
        source: process::ProcessError,
    },
    #[error("'{command}' printed no version: {output}")]
    NotFound { command: String, output: String },
    #[error("invalid configured version '{value}': {source}")]
    Configured {
        value: String,
        #[source]
        source: semver::Error,
    },
}

/// Extract the first `MAJOR.MINOR.PATCH` triple from version banner text.
///
/// Handles banners such as `zksolc, the ZKsync Solidity compiler v1.5.7`
/// and `Version: 0.8.28+commit.7893614a.Linux.g++`.
pub fn parse(text: &str) -> Option<Version> {
    let re = regex::Regex::new(r"v?(\d+)\.(\d+)\.(\d+)").ok()?;
    let caps = re.captures(text)?;
    let part = |i: usize| caps.get(i)?.as_str().parse::<u64>().ok();
    Some(Version::new(part(1)?, part(2)?, part(3)?))
}

/// Run `<command> --version` and parse its output.
pub fn detect(command: &str) -> Result<Version, VersionError> {
    let invocation = CommandInvocation::new(command, ["--version"]);
    let result = process::run(&invocation).map_err(|source| VersionError::Run {
        command: command.to_string(),
        source,
    })?;
    let version = parse(&result.output).ok_or_else(|| VersionError::NotFound {
        command: command.to_string(),
        output: result.output.clone(),
    })?;
    tracing::debug!(command, %version, "detected compiler version");
    Ok(version)
}

/// Parse a version given in the suite config, accepting a leading `v`.
pub fn parse_configured(value: &str) -> Result<Version, VersionError> {
    Version::parse(value.trim().trim_start_matches('v')).map_err(|source| {
        VersionError::Configured {
            value: value.to_string(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_zksolc_banner() {
        assert_eq!(
            parse("zksolc, the ZKsync Solidity compiler v1.5.7"),
            Some(Version::new(1, 5, 7))
        );
    }

    #[test]
    fn parse_solc_banner() {
        let banner = "solc, the solidity compiler commandline interface\n\
                      Version: 0.8.28+commit.7893614a.Linux.g++";
        assert_eq!(parse(banner), Some(Version::new(0, 8, 28)));
    }

    #[test]
    fn parse_without_version() {
        assert_eq!(parse("command not found"), None);
        assert_eq!(parse("1.5"), None);
    }

    #[test]
    fn configured_versions() {
        assert_eq!(parse_configured("1.4.1").unwrap(), Version::new(1, 4, 1));
        assert_eq!(parse_configured(" v1.5.0 ").unwrap(), Version::new(1, 5, 0));
        assert!(matches!(
            parse_configured("latest"),
            Err(VersionError::Configured { .. })
        ));
    }

    #[test]
    #[cfg(unix)]
    fn detect_from_stand_in_command() {
        let version = detect("echo zksolc v1.5.7 #").unwrap();
        assert_eq!(version, Version::new(1, 5, 7));
    }

    #[test]
    #[cfg(unix)]
    fn detect_without_version_output() {
        let err = detect("true").unwrap_err();
        assert!(matches!(err, VersionError::NotFound { .. }));
    }
}
