//! Case file loader.
//!
//! Loads, expands and validates case files from disk.

use crate::interpolate;
use crate::workspace;
use crate::paths::PathSet;
use crate::schema::{
    CaseFile, Expect, OutputMatch, SetupStep, Step, SuiteConfig, TeardownStep, Test,
};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

/// Error type for case loading operations.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Failed to read the file.
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse YAML.
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Failed to parse TOML.
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    /// Unsupported file extension.
    #[error("unsupported file format: {0} (expected .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),
}

/// The name of the suite configuration file.
pub const SUITE_CONFIG_FILENAME: &str = "cli-tests.yaml";

/// Placeholders bound by the runner rather than by the suite paths.
const RUNTIME_PLACEHOLDERS: &[&str] = &["zksolc", "solc", "solc.path"];

/// Load a case file from a file path, expanding `each` tests.
pub fn load_case_file(path: &Path) -> Result<CaseFile, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path)?;

    let mut file: CaseFile = match ext {
        "yaml" | "yml" => serde_yaml::from_str(&contents)?,
        "toml" => toml::from_str(&contents)?,
        other => return Err(LoadError::UnsupportedFormat(other.to_string())),
    };
    file.tests = expand_each(file.tests);
    Ok(file)
}

/// Replace every test carrying `each` with one test per value.
///
/// Expanded tests are named `<name> [<value>]` and bind `${item}`.
pub fn expand_each(tests: Vec<Test>) -> Vec<Test> {
    let mut expanded = Vec::with_capacity(tests.len());
    for test in tests {
        if test.each.is_empty() {
            expanded.push(test);
            continue;
        }
        for item in &test.each {
            let mut instance = test.clone();
            instance.name = format!("{} [{item}]", test.name);
            instance.each = Vec::new();
            instance.item = Some(item.clone());
            expanded.push(instance);
        }
    }
    expanded
}

/// Load suite configuration from a directory.
///
/// Looks for `cli-tests.yaml` in the given directory.
/// Returns `None` if the file doesn't exist, `Err` if it exists but is invalid.
pub fn load_suite_config(dir: &Path) -> Result<Option<SuiteConfig>, LoadError> {
    let config_path = dir.join(SUITE_CONFIG_FILENAME);

    if !config_path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&config_path)?;
    let config: SuiteConfig = serde_yaml::from_str(&contents)?;
    Ok(Some(config))
}

/// The suite root for `path`: the nearest directory at or above it holding
/// `cli-tests.yaml`, or the directory of `path` itself if there is none.
pub fn find_suite_root(path: &Path) -> PathBuf {
    let start = if path.is_file() {
        path.parent().unwrap_or(path)
    } else {
        path
    };
    start
        .ancestors()
        .find(|dir| dir.join(SUITE_CONFIG_FILENAME).is_file())
        .unwrap_or(start)
        .to_path_buf()
}

/// Find all case files in a directory or return the single file.
pub fn find_case_files(path: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    collect_recursive(path, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_recursive(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            collect_recursive(&path, files)?;
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str())
            && (ext == "yaml" || ext == "yml" || ext == "toml")
        {
            // Skip suite config file
            if path.file_name().is_some_and(|f| f == SUITE_CONFIG_FILENAME) {
                continue;
            }
            files.push(path);
        }
    }
    Ok(())
}

/// Check a loaded case file for mistakes that parsing cannot catch.
///
/// Returns one message per problem; an empty list means the file is valid.
pub fn validate_case_file(file: &CaseFile) -> Vec<String> {
    let mut problems = Vec::new();

    if file.version != 1 {
        problems.push(format!("unsupported version {} (expected 1)", file.version));
    }

    let static_names: BTreeSet<String> = PathSet::with_defaults(Path::new(""))
        .placeholders()
        .into_keys()
        .chain(RUNTIME_PLACEHOLDERS.iter().map(|s| s.to_string()))
        .collect();

    for text in setup_strings(&file.setup).chain(teardown_strings(&file.teardown)) {
        check_placeholders(&text, &static_names, "file setup/teardown", &mut problems);
    }

    let mut names = HashSet::new();
    for test in &file.tests {
        if !names.insert(test.name.as_str()) {
            problems.push(format!("duplicate test name '{}'", test.name));
        }
        validate_test(test, &static_names, &mut problems);
    }
    problems
}

fn validate_test(test: &Test, static_names: &BTreeSet<String>, problems: &mut Vec<String>) {
    let context = format!("test '{}'", test.name);
    if test.steps.is_empty() {
        problems.push(format!("{context}: no steps"));
    }

    let mut names = static_names.clone();
    if let Some(template) = test.workspace.as_ref().and_then(|w| w.template()) {
        if let Err(e) = workspace::validate_template(template) {
            problems.push(format!("{context}: {e}"));
        }
        names.insert("workspace".to_string());
    }
    if test.item.is_some() {
        names.insert("item".to_string());
    }

    let mut texts: Vec<String> = setup_strings(&test.setup)
        .chain(teardown_strings(&test.teardown))
        .collect();
    for step in &test.steps {
        texts.extend(step_strings(step));
        validate_expect(&step.expect, &format!("{context}, step '{}'", step.name), problems);
    }
    for text in texts {
        check_placeholders(&text, &names, &context, problems);
    }
}

fn validate_expect(expect: &Expect, context: &str, problems: &mut Vec<String>) {
    let outputs = expect
        .output
        .iter()
        .chain(expect.versions.iter().filter_map(|v| v.output.as_ref()));
    for output in outputs {
        if let OutputMatch::Structured(s) = output {
            for pattern in [&s.regex, &s.not_regex].into_iter().flatten() {
                if let Err(e) = regex::Regex::new(pattern) {
                    problems.push(format!("{context}: invalid regex '{pattern}': {e}"));
                }
            }
        }
    }
    for versioned in &expect.versions {
        if let Err(e) = semver::VersionReq::parse(&versioned.requirement) {
            problems.push(format!(
                "{context}: invalid version requirement '{}': {e}",
                versioned.requirement
            ));
        }
    }
}

fn check_placeholders(
    text: &str,
    known: &BTreeSet<String>,
    context: &str,
    problems: &mut Vec<String>,
) {
    for name in interpolate::referenced(text) {
        if !known.contains(&name) {
            problems.push(format!("{context}: unknown placeholder '${{{name}}}' in '{text}'"));
        }
    }
}

fn setup_strings(steps: &[SetupStep]) -> impl Iterator<Item = String> + '_ {
    steps.iter().flat_map(|step| {
        let mut texts = Vec::new();
        if let Some(write) = &step.write_file {
            texts.push(write.path.clone());
        }
        texts.extend(step.create_dir.clone());
        if let Some(permission) = &step.set_permission {
            texts.push(permission.path.clone());
        }
        if let Some(run) = &step.run {
            texts.push(String::from(run.cmd.clone()));
            texts.extend(run.args.iter().cloned());
        }
        texts
    })
}

fn teardown_strings(steps: &[TeardownStep]) -> impl Iterator<Item = String> + '_ {
    steps.iter().flat_map(|step| {
        let mut texts = Vec::new();
        texts.extend(step.remove_dir.clone());
        if let Some(permission) = &step.set_permission {
            texts.push(permission.path.clone());
        }
        if let Some(run) = &step.run {
            texts.push(String::from(run.cmd.clone()));
            texts.extend(run.args.iter().cloned());
        }
        texts
    })
}

fn step_strings(step: &Step) -> Vec<String> {
    let mut texts: Vec<String> = setup_strings(&step.setup)
        .chain(teardown_strings(&step.teardown))
        .collect();
    texts.push(String::from(step.run.cmd.clone()));
    texts.extend(step.run.args.iter().cloned());
    texts.extend(step.run.cwd.clone());
    if let Some(reference) = &step.expect.reference {
        texts.extend(reference.args.iter().flatten().cloned());
    }
    for file in &step.expect.files {
        texts.push(file.path.clone());
        if let Some(run) = &file.same_as_output_of {
            texts.push(String::from(run.cmd.clone()));
            texts.extend(run.args.iter().cloned());
            texts.extend(run.cwd.clone());
        }
    }
    texts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn parse(yaml: &str) -> CaseFile {
        let mut file: CaseFile = serde_yaml::from_str(yaml).unwrap();
        file.tests = expand_each(file.tests);
        file
    }

    #[test]
    fn load_valid_case_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bin.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
version: 1
tests:
  - name: bin by default
    run:
      args: ["${{contracts.solidity}}", "--bin"]
    expect:
      exit: 0
"#
        )
        .unwrap();

        let case_file = load_case_file(&path).unwrap();
        assert_eq!(case_file.version, 1);
        assert_eq!(case_file.tests.len(), 1);
    }

    #[test]
    fn load_invalid_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "invalid: [yaml: {").unwrap();

        let result = load_case_file(&path);
        assert!(matches!(result, Err(LoadError::Yaml(_))));
    }

    #[test]
    fn unsupported_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cases.txt");
        std::fs::write(&path, "").unwrap();

        let result = load_case_file(&path);
        assert!(matches!(result, Err(LoadError::UnsupportedFormat(_))));
    }

    #[test]
    fn load_valid_toml_case_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("asm.toml");
        std::fs::write(
            &path,
            r#"
version = 1

[[tests]]
name = "asm by default"

[tests.run]
args = ["${contracts.solidity}", "--asm"]

[tests.expect]
exit = 0
"#,
        )
        .unwrap();

        let case_file = load_case_file(&path).unwrap();
        assert_eq!(case_file.tests.len(), 1);
        assert_eq!(case_file.tests[0].name, "asm by default");
    }

    #[test]
    fn load_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "invalid = [toml").unwrap();

        let result = load_case_file(&path);
        assert!(matches!(result, Err(LoadError::Toml(_))));
    }

    #[test]
    fn each_expands_into_named_tests() {
        let file = parse(
            r#"
version: 1
tests:
  - name: combined-json
    each: [abi, hashes, metadata]
    run:
      args: ["${contracts.solidity}", "--combined-json", "${item}"]
  - name: plain
    run: { args: ["--version"] }
"#,
        );
        let names: Vec<_> = file.tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "combined-json [abi]",
                "combined-json [hashes]",
                "combined-json [metadata]",
                "plain"
            ]
        );
        assert_eq!(file.tests[1].item.as_deref(), Some("hashes"));
        assert!(file.tests[1].each.is_empty());
        assert!(file.tests[3].item.is_none());
    }

    #[test]
    fn find_case_files_in_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "").unwrap();
        std::fs::write(dir.path().join("b.yml"), "").unwrap();
        std::fs::write(dir.path().join("c.toml"), "").unwrap();
        std::fs::write(dir.path().join("d.txt"), "").unwrap();

        let files = find_case_files(dir.path()).unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn find_case_files_excludes_suite_config() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "").unwrap();
        std::fs::write(dir.path().join(SUITE_CONFIG_FILENAME), "version: 1").unwrap();

        let files = find_case_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].file_name().unwrap() != SUITE_CONFIG_FILENAME);
    }

    #[test]
    fn suite_root_is_found_above_case_files() {
        let dir = tempdir().unwrap();
        let cases = dir.path().join("cases");
        std::fs::create_dir(&cases).unwrap();
        std::fs::write(cases.join("bin.yaml"), "").unwrap();
        std::fs::write(dir.path().join(SUITE_CONFIG_FILENAME), "version: 1").unwrap();

        assert_eq!(find_suite_root(&cases.join("bin.yaml")), dir.path());
        assert_eq!(find_suite_root(&cases), dir.path());
        assert_eq!(find_suite_root(dir.path()), dir.path());
    }

    #[test]
    fn suite_root_without_config() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bin.yaml");
        std::fs::write(&file, "").unwrap();
        assert_eq!(find_suite_root(&file), dir.path());
    }

    #[test]
    fn load_suite_config_not_found() {
        let dir = tempdir().unwrap();
        let result = load_suite_config(dir.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn load_suite_config_valid() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SUITE_CONFIG_FILENAME),
            r#"
version: 1
timeout: 60
zksolc: /opt/zksolc/zksolc
zksolc_version: 1.5.7
output_dir: build
"#,
        )
        .unwrap();

        let config = load_suite_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.timeout, Some(60));
        assert_eq!(config.zksolc.as_deref(), Some("/opt/zksolc/zksolc"));
        assert_eq!(config.zksolc_version.as_deref(), Some("1.5.7"));
        assert_eq!(config.output_dir, PathBuf::from("build"));
        assert_eq!(config.contracts_dir, PathBuf::from("contracts"));
    }

    #[test]
    fn load_suite_config_invalid() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SUITE_CONFIG_FILENAME), "invalid: [yaml: {").unwrap();

        let result = load_suite_config(dir.path());
        assert!(matches!(result, Err(LoadError::Yaml(_))));
    }

    #[test]
    fn valid_file_has_no_problems() {
        let file = parse(
            r#"
version: 1
tests:
  - name: output dir
    workspace: true
    run:
      args: ["${contracts.solidity}", "--bin", "--output-dir", "${workspace}"]
    expect:
      output:
        regex: "Compiler run successful"
      reference: {}
      files:
        - path: ${workspace}/${file.solidity}/${artifact.bin}
          empty: false
      versions:
        - requirement: "<1.4.0"
          output: { contains: "Compiler run successful" }
  - name: solc path
    each: ["--bin"]
    run:
      args: ["${contracts.solidity}", "${item}", "--solc", "${solc.path}"]
"#,
        );
        assert_eq!(validate_case_file(&file), Vec::<String>::new());
    }

    #[test]
    fn detects_problems() {
        let file = parse(
            r#"
version: 2
tests:
  - name: twice
    run: { args: ["${workspace}"] }
    expect:
      output: { regex: "(unclosed" }
      versions:
        - requirement: "not a requirement"
  - name: twice
    steps: []
"#,
        );
        let problems = validate_case_file(&file);
        assert!(problems.iter().any(|p| p.contains("unsupported version 2")));
        assert!(problems.iter().any(|p| p.contains("unknown placeholder '${workspace}'")));
        assert!(problems.iter().any(|p| p.contains("invalid regex")));
        assert!(problems.iter().any(|p| p.contains("invalid version requirement")));
        assert!(problems.iter().any(|p| p.contains("duplicate test name 'twice'")));
        assert!(problems.iter().any(|p| p.contains("no steps")));
    }

    #[test]
    fn detects_unusable_workspace_template() {
        let file = parse(
            r#"
version: 1
tests:
  - name: fixed name
    workspace: out
    run: { args: ["--output-dir", "${workspace}"] }
  - name: random name
    workspace: out-XXXX
    run: { args: ["--output-dir", "${workspace}"] }
"#,
        );
        let problems = validate_case_file(&file);
        assert_eq!(problems.len(), 1, "{problems:?}");
        assert!(problems[0].contains("test 'fixed name'"), "{problems:?}");
        assert!(problems[0].contains("invalid workspace template"), "{problems:?}");
    }

    #[test]
    fn item_requires_each() {
        let file = parse(
            r#"
version: 1
tests:
  - name: stray item
    run: { args: ["--combined-json", "${item}"] }
"#,
        );
        let problems = validate_case_file(&file);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("'${item}'"));
    }
}
