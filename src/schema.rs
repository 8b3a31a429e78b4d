//! Schema definitions for case files.
//!
//! A case file declares compiler invocations and what they must produce.
//! Case files are written in YAML (or TOML) and validated against these types.

use crate::platform::{PermissionMode, PlatformKind};
use crate::workspace::DEFAULT_TEMPLATE;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Suite-level configuration loaded from `cli-tests.yaml` in the suite root.
///
/// Provides the compilers and defaults that apply to all case files.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SuiteConfig {
    /// Schema version (must match crate major version).
    #[serde(default = "default_version")]
    pub version: u32,

    /// Compiler under test (default: `zksolc` from `PATH`).
    #[serde(default)]
    pub zksolc: Option<String>,

    /// Reference compiler (default: `solc` from `PATH`).
    #[serde(default)]
    pub solc: Option<String>,

    /// Version of the compiler under test. Skips `zksolc --version` detection.
    #[serde(default)]
    pub zksolc_version: Option<String>,

    /// Fixture directory, relative to the suite root.
    #[serde(default = "default_contracts_dir")]
    pub contracts_dir: PathBuf,

    /// Root under which workspaces are created, relative to the suite root.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Default timeout in seconds for every invocation. No timeout when unset.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Run case files serially instead of in parallel (default: false).
    #[serde(default)]
    pub serial: bool,

    /// Setup steps run before the entire suite.
    #[serde(default)]
    pub setup: Vec<SetupStep>,

    /// Teardown steps run after the entire suite.
    #[serde(default)]
    pub teardown: Vec<TeardownStep>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            zksolc: None,
            solc: None,
            zksolc_version: None,
            contracts_dir: default_contracts_dir(),
            output_dir: default_output_dir(),
            timeout: None,
            serial: false,
            setup: Vec::new(),
            teardown: Vec::new(),
        }
    }
}

fn default_version() -> u32 {
    1
}

fn default_contracts_dir() -> PathBuf {
    PathBuf::from(crate::paths::DEFAULT_CONTRACTS_DIR)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(crate::paths::DEFAULT_OUTPUT_DIR)
}

/// Root document of a case file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CaseFile {
    /// Schema version (must match crate major version).
    pub version: u32,

    /// What the tests in this file cover, e.g. "Set of --bin tests".
    #[serde(default)]
    pub description: Option<String>,

    /// Default timeout in seconds for tests in this file.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Setup steps run before all tests in this file.
    #[serde(default)]
    pub setup: Vec<SetupStep>,

    /// The tests defined in this file.
    pub tests: Vec<Test>,

    /// Teardown steps run after all tests in this file.
    #[serde(default)]
    pub teardown: Vec<TeardownStep>,
}

/// A setup step.
///
/// Each step is a single-key map where the key determines the action.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct SetupStep {
    /// Write a file with the given contents.
    #[serde(default)]
    pub write_file: Option<WriteFile>,

    /// Create a directory and its parents.
    #[serde(default)]
    pub create_dir: Option<String>,

    /// Change the permissions of a directory tree.
    #[serde(default)]
    pub set_permission: Option<SetPermission>,

    /// Run an arbitrary command.
    #[serde(default)]
    pub run: Option<RunStep>,
}

/// A teardown step.
///
/// Each step is a single-key map where the key determines the action.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct TeardownStep {
    /// Remove a directory recursively.
    #[serde(default)]
    pub remove_dir: Option<String>,

    /// Change the permissions of a directory tree.
    #[serde(default)]
    pub set_permission: Option<SetPermission>,

    /// Run an arbitrary command.
    #[serde(default)]
    pub run: Option<RunStep>,
}

/// Write a file with specific contents.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WriteFile {
    /// Path to the file (relative to the workspace, or the suite root without one).
    pub path: String,

    /// File contents.
    pub contents: String,
}

/// Change the permissions of a directory tree.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SetPermission {
    pub path: String,
    pub mode: PermissionMode,
}

/// A command to run in setup or teardown. A non-zero exit fails the step.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunStep {
    /// The command to execute.
    pub cmd: Program,

    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

/// The program a step invokes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(from = "String", into = "String")]
pub enum Program {
    /// The compiler under test.
    #[default]
    Zksolc,
    /// The reference compiler.
    Solc,
    /// Any other command line fragment.
    Command(String),
}

impl From<String> for Program {
    fn from(s: String) -> Self {
        match s.as_str() {
            "zksolc" => Program::Zksolc,
            "solc" => Program::Solc,
            _ => Program::Command(s),
        }
    }
}

impl From<Program> for String {
    fn from(program: Program) -> String {
        match program {
            Program::Zksolc => "zksolc".to_string(),
            Program::Solc => "solc".to_string(),
            Program::Command(s) => s,
        }
    }
}

/// Command execution configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Run {
    /// The program to execute (default: `zksolc`).
    #[serde(default)]
    pub cmd: Program,

    /// Arguments, raw shell fragments joined with spaces.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory (default: the workspace, or the suite root without one).
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Request for a per-test workspace: `true` or a name template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum WorkspaceRequest {
    Enabled(bool),
    Template(String),
}

impl WorkspaceRequest {
    /// The template to create the workspace from, `None` if disabled.
    pub fn template(&self) -> Option<&str> {
        match self {
            WorkspaceRequest::Enabled(true) => Some(DEFAULT_TEMPLATE),
            WorkspaceRequest::Enabled(false) => None,
            WorkspaceRequest::Template(template) => Some(template),
        }
    }
}

/// A single step within a multi-step test.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    /// Step name (used in failure reporting).
    pub name: String,

    /// Step-level setup steps.
    #[serde(default)]
    pub setup: Vec<SetupStep>,

    /// The command to execute.
    pub run: Run,

    /// Expected outcomes.
    #[serde(default)]
    pub expect: Expect,

    /// Step-level teardown steps.
    #[serde(default)]
    pub teardown: Vec<TeardownStep>,
}

/// Shape of a test as written in a case file.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct RawTest {
    /// Unique name for this test.
    name: String,
    /// Identifier of the case in the compiler's test plan.
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    /// Reason the test is disabled. Skipped tests are reported, not run.
    #[serde(default)]
    skip: Option<String>,
    /// Hosts the test runs on (default: all).
    #[serde(default)]
    platforms: Vec<PlatformKind>,
    /// Values to expand the test over, bound to `${item}`.
    #[serde(default)]
    each: Vec<String>,
    /// Per-test workspace, bound to `${workspace}`.
    #[serde(default)]
    workspace: Option<WorkspaceRequest>,
    #[serde(default)]
    setup: Vec<SetupStep>,
    /// Single-step form: the command to execute.
    #[serde(default)]
    run: Option<Run>,
    /// Single-step form: expected outcomes.
    #[serde(default)]
    expect: Option<Expect>,
    /// Multi-step form.
    #[serde(default)]
    steps: Option<Vec<Step>>,
    #[serde(default)]
    teardown: Vec<TeardownStep>,
    /// Timeout in seconds (overrides file/suite default).
    #[serde(default)]
    timeout: Option<u64>,
    /// Whether this test must run serially (not in parallel).
    #[serde(default)]
    serial: bool,
}

/// A single test case.
///
/// Tests can be defined in two forms:
/// 1. Single-step: `run` + `expect` fields
/// 2. Multi-step: `steps` array with named steps
///
/// Internally, single-step tests are converted to a single step named "run".
#[derive(Debug, Clone, Serialize)]
pub struct Test {
    pub name: String,
    pub id: Option<String>,
    pub description: Option<String>,
    pub skip: Option<String>,
    pub platforms: Vec<PlatformKind>,
    pub each: Vec<String>,
    /// Value bound to `${item}` once `each` has been expanded.
    #[serde(skip)]
    pub item: Option<String>,
    pub workspace: Option<WorkspaceRequest>,
    pub setup: Vec<SetupStep>,
    pub steps: Vec<Step>,
    pub teardown: Vec<TeardownStep>,
    pub timeout: Option<u64>,
    pub serial: bool,
}

impl Test {
    /// Whether the test is meant to run on `platform`.
    pub fn runs_on(&self, platform: PlatformKind) -> bool {
        self.platforms.is_empty() || self.platforms.contains(&platform)
    }
}

impl TryFrom<RawTest> for Test {
    type Error = String;

    fn try_from(raw: RawTest) -> Result<Self, Self::Error> {
        let steps = match (raw.steps, raw.run) {
            (Some(_), Some(_)) => {
                return Err(format!(
                    "test '{}': use either 'run' or 'steps', not both",
                    raw.name
                ));
            }
            (Some(steps), None) => {
                if raw.expect.is_some() {
                    return Err(format!(
                        "test '{}': 'expect' belongs to each step when 'steps' is used",
                        raw.name
                    ));
                }
                steps
            }
            // Single run/expect becomes a single step named "run"
            (None, Some(run)) => vec![Step {
                name: "run".to_string(),
                setup: Vec::new(),
                run,
                expect: raw.expect.unwrap_or_default(),
                teardown: Vec::new(),
            }],
            (None, None) => {
                return Err(format!("test '{}': missing 'run' or 'steps'", raw.name));
            }
        };

        Ok(Test {
            name: raw.name,
            id: raw.id,
            description: raw.description,
            skip: raw.skip,
            platforms: raw.platforms,
            each: raw.each,
            item: None,
            workspace: raw.workspace,
            setup: raw.setup,
            steps,
            teardown: raw.teardown,
            timeout: raw.timeout,
            serial: raw.serial,
        })
    }
}

impl<'de> Deserialize<'de> for Test {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawTest::deserialize(deserializer)?;
        Test::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for Test {
    fn schema_name() -> String {
        "Test".to_string()
    }

    fn json_schema(generator: &mut schemars::r#gen::SchemaGenerator) -> schemars::schema::Schema {
        RawTest::json_schema(generator)
    }
}

/// Expected outcomes of an invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Expect {
    /// Expected exit code (default: 0), or `any` to skip the check.
    #[serde(default)]
    pub exit: Option<ExitExpect>,

    /// Expected output: trimmed stdout, or trimmed stderr when stdout is empty.
    #[serde(default)]
    pub output: Option<OutputMatch>,

    /// Exit code parity with the reference compiler.
    #[serde(default)]
    pub reference: Option<ReferenceExpect>,

    /// Expected filesystem state.
    #[serde(default)]
    pub files: Vec<FileExpect>,

    /// Overrides for compiler versions whose diagnostics differ.
    /// The first entry whose requirement matches wins.
    #[serde(default)]
    pub versions: Vec<VersionedExpect>,
}

/// Expected exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ExitExpect {
    Code(i32),
    Any(AnyExit),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AnyExit {
    Any,
}

/// Matching rules for output.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum OutputMatch {
    /// Exact string match.
    Exact(String),

    /// Structured match with multiple options.
    Structured(OutputMatchStructured),
}

/// Structured output matching with multiple match types.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct OutputMatchStructured {
    /// Exact string match.
    #[serde(default)]
    pub equals: Option<String>,

    /// Substring match.
    #[serde(default)]
    pub contains: Option<String>,

    /// Regular expression match.
    #[serde(default)]
    pub regex: Option<String>,

    /// Regular expression that must not match.
    #[serde(default)]
    pub not_regex: Option<String>,
}

/// Parity check against the reference compiler.
///
/// Runs `solc` with the same arguments (or `args`) and compares exit codes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ReferenceExpect {
    /// Arguments for the reference compiler, if they differ.
    #[serde(default)]
    pub args: Option<Vec<String>>,

    /// Expected reference exit code when it legitimately differs.
    #[serde(default)]
    pub exit: Option<i32>,
}

/// Expected state of a path after the invocation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FileExpect {
    /// Path to the file or directory.
    pub path: String,

    /// Whether the path should exist.
    #[serde(default)]
    pub exists: Option<bool>,

    /// Whether the file (or directory) should be empty.
    #[serde(default)]
    pub empty: Option<bool>,

    /// The file and the output of this command must contain one another.
    #[serde(default)]
    pub same_as_output_of: Option<Run>,
}

/// Expectation override for a range of compiler versions.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VersionedExpect {
    /// Semver requirement, e.g. `<1.5.0`.
    pub requirement: String,

    #[serde(default)]
    pub exit: Option<ExitExpect>,

    #[serde(default)]
    pub output: Option<OutputMatch>,
}

/// Generate the JSON Schema for case files.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(CaseFile)
}
