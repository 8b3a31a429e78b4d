//! Placeholder interpolation for case arguments and paths.

use std::collections::BTreeMap;

/// Values available to `${name}` placeholders.
pub type Placeholders = BTreeMap<String, String>;

/// Error type for interpolation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpolateError {
    #[error("unclosed placeholder: ${{{0}")]
    Unclosed(String),
    #[error("unknown placeholder '{0}'")]
    Unknown(String),
}

/// Replace `${name}` placeholders in a string.
///
/// A `$` not followed by `{` is kept as is, so shell constructs like `$$`
/// pass through untouched.
///
/// # Examples
///
/// ```
/// use zksolc_cli_tests::interpolate::{interpolate, Placeholders};
///
/// let mut values = Placeholders::new();
/// values.insert("workspace".to_string(), "/tmp/tmp-a1b2c3".to_string());
/// assert_eq!(
///     interpolate("--output-dir ${workspace}", &values).unwrap(),
///     "--output-dir /tmp/tmp-a1b2c3"
/// );
/// ```
pub fn interpolate(s: &str, values: &Placeholders) -> Result<String, InterpolateError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => name.push(c),
                    None => return Err(InterpolateError::Unclosed(name)),
                }
            }
            let value = values
                .get(&name)
                .ok_or_else(|| InterpolateError::Unknown(name.clone()))?;
            result.push_str(value);
        } else {
            result.push(c);
        }
    }

    Ok(result)
}

/// Names of the placeholders referenced by `s`, in order of appearance.
pub fn referenced(s: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                names.push(after[..end].to_string());
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    names
}
