//! Case execution engine.
//!
//! Runs case files against the compiler under test and captures results.

use crate::compare;
use crate::interpolate::{self, Placeholders};
use crate::loader;
use crate::paths::PathSet;
use crate::platform;
use crate::inspect;
use crate::process::{self, CommandInvocation, CommandResult};
use crate::schema::{
    CaseFile, ExitExpect, Expect, FileExpect, OutputMatch, OutputMatchStructured, Program, Run,
    RunStep, SetupStep, Step, SuiteConfig, TeardownStep, Test,
};
use crate::version;
use crate::workspace::{self, Workspace};
use semver::{Version, VersionReq};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Result of running a case file.
#[derive(Debug, serde::Serialize)]
pub struct CaseFileResult {
    pub tests: Vec<TestResult>,
}

/// Result of running a single test.
#[derive(Debug, serde::Serialize)]
pub struct TestResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub passed: bool,
    /// Why the test did not run, if it was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
    pub failures: Vec<String>,
}

impl TestResult {
    fn failed(name: &str, failure: String) -> Self {
        Self {
            name: name.to_string(),
            id: None,
            passed: false,
            skipped: None,
            duration: Duration::ZERO,
            failures: vec![failure],
        }
    }
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Everything a run needs to know about the suite: where the fixtures are
/// and which compilers to invoke.
#[derive(Debug, Clone)]
pub struct SuiteContext {
    pub paths: PathSet,
    /// Command line fragment invoking the compiler under test.
    pub zksolc: String,
    /// Command line fragment invoking the reference compiler.
    pub solc: String,
    /// Version of the compiler under test, if known.
    pub zksolc_version: Option<Version>,
    /// Timeout for invocations of tests and files that set none.
    pub default_timeout: Option<u64>,
    placeholders: Placeholders,
}

impl SuiteContext {
    pub fn new(
        paths: PathSet,
        zksolc: impl Into<String>,
        solc: impl Into<String>,
        zksolc_version: Option<Version>,
        default_timeout: Option<u64>,
    ) -> Self {
        let zksolc = zksolc.into();
        let solc = solc.into();

        let mut placeholders = paths.placeholders();
        placeholders.insert("zksolc".to_string(), zksolc.clone());
        placeholders.insert("solc".to_string(), solc.clone());
        let solc_path = platform::locate_program(&solc).unwrap_or_else(|| solc.clone());
        placeholders.insert("solc.path".to_string(), solc_path);

        Self {
            paths,
            zksolc,
            solc,
            zksolc_version,
            default_timeout,
            placeholders,
        }
    }

    /// Build the context of the suite rooted at `root`.
    ///
    /// Binaries given on the command line win over the suite config, which
    /// wins over the search path. The compiler version comes from the config
    /// when set, otherwise from `zksolc --version`.
    pub fn from_config(
        root: &Path,
        config: &SuiteConfig,
        zksolc: Option<&str>,
        solc: Option<&str>,
    ) -> std::io::Result<Self> {
        let root = std::path::absolute(root)?;
        let paths = PathSet::new(&root, &config.contracts_dir, &config.output_dir);
        let zksolc = zksolc
            .or(config.zksolc.as_deref())
            .unwrap_or("zksolc")
            .to_string();
        let solc = solc.or(config.solc.as_deref()).unwrap_or("solc").to_string();

        let zksolc_version = match &config.zksolc_version {
            Some(value) => match version::parse_configured(value) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("{e}");
                    None
                }
            },
            None => match version::detect(&zksolc) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("version-specific expectations disabled: {e}");
                    None
                }
            },
        };

        Ok(Self::new(
            paths,
            zksolc,
            solc,
            zksolc_version,
            config.timeout,
        ))
    }

    pub fn placeholders(&self) -> &Placeholders {
        &self.placeholders
    }

    fn scope(&self) -> Scope<'_> {
        Scope {
            ctx: self,
            placeholders: self.placeholders.clone(),
            cwd: self.paths.root.clone(),
        }
    }
}

/// Placeholder values and working directory of one test.
struct Scope<'a> {
    ctx: &'a SuiteContext,
    placeholders: Placeholders,
    cwd: PathBuf,
}

impl Scope<'_> {
    fn with_workspace(mut self, workspace: &Path) -> Self {
        self.placeholders
            .insert("workspace".to_string(), workspace.display().to_string());
        self.cwd = workspace.to_path_buf();
        self
    }

    fn with_item(mut self, item: &str) -> Self {
        self.placeholders.insert("item".to_string(), item.to_string());
        self
    }

    fn resolve(&self, s: &str) -> Result<String, String> {
        interpolate::interpolate(s, &self.placeholders).map_err(|e| format!("{e} in {s:?}"))
    }

    fn resolve_path(&self, s: &str) -> Result<PathBuf, String> {
        let path = PathBuf::from(self.resolve(s)?);
        Ok(if path.is_absolute() {
            path
        } else {
            self.cwd.join(path)
        })
    }

    fn program(&self, program: &Program) -> Result<String, String> {
        match program {
            Program::Zksolc => Ok(self.ctx.zksolc.clone()),
            Program::Solc => Ok(self.ctx.solc.clone()),
            Program::Command(command) => self.resolve(command),
        }
    }

    fn invocation(&self, program: &Program, args: &[String]) -> Result<CommandInvocation, String> {
        let args = args
            .iter()
            .map(|arg| self.resolve(arg))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CommandInvocation::new(self.program(program)?, args))
    }

    fn cwd_for(&self, run: &Run) -> Result<PathBuf, String> {
        match &run.cwd {
            Some(cwd) => self.resolve_path(cwd),
            None => Ok(self.cwd.clone()),
        }
    }
}

/// Run suite-level setup steps from the suite root.
pub fn run_suite_setup(config: &SuiteConfig, ctx: &SuiteContext) -> Result<(), String> {
    run_setup_steps(&config.setup, &ctx.scope())
}

/// Run suite-level teardown steps, then remove every workspace the suite
/// left behind.
pub fn run_suite_teardown(config: &SuiteConfig, ctx: &SuiteContext) -> Result<(), String> {
    let result = run_teardown_steps(&config.teardown, &ctx.scope());
    workspace::cleanup_under(&ctx.paths.output_dir);
    result
}

/// Run a case file.
pub fn run_case_file(file: &CaseFile, ctx: &SuiteContext) -> CaseFileResult {
    run_case_file_filtered(file, ctx, None)
}

/// Run the tests of a case file whose name contains `filter`, or whose id equals it.
pub fn run_case_file_filtered(
    file: &CaseFile,
    ctx: &SuiteContext,
    filter: Option<&str>,
) -> CaseFileResult {
    let file_timeout = file.timeout.or(ctx.default_timeout);
    let scope = ctx.scope();

    let filtered_tests: Vec<(usize, &Test)> = file
        .tests
        .iter()
        .enumerate()
        .filter(|(_, test)| filter.is_none_or(|f| matches_filter(test, f)))
        .collect();

    // Files with nothing to run keep their setup from touching the tree
    if filtered_tests.is_empty() {
        return CaseFileResult { tests: vec![] };
    }

    if let Err(e) = run_setup_steps(&file.setup, &scope) {
        return CaseFileResult {
            tests: vec![TestResult::failed("<setup>", format!("Setup failed: {e}"))],
        };
    }

    // Partition tests into serial and parallel groups, preserving indices
    let (serial_tests, parallel_tests): (Vec<_>, Vec<_>) = filtered_tests
        .into_iter()
        .partition(|(_, test)| test.serial);

    let mut indexed_results: Vec<(usize, TestResult)> = Vec::with_capacity(file.tests.len());

    // Run serial tests first, in order
    for (idx, test) in serial_tests {
        indexed_results.push((idx, run_test(test, ctx, file_timeout)));
    }

    // Run parallel tests concurrently
    if !parallel_tests.is_empty() {
        thread::scope(|s| {
            let handles: Vec<_> = parallel_tests
                .iter()
                .map(|&(idx, test)| (idx, test, s.spawn(move || run_test(test, ctx, file_timeout))))
                .collect();

            for (idx, test, handle) in handles {
                let result = handle.join().unwrap_or_else(|_| {
                    TestResult::failed(&test.name, "test thread panicked".to_string())
                });
                indexed_results.push((idx, result));
            }
        });
    }

    // Sort by original index to maintain declaration order
    indexed_results.sort_by_key(|(idx, _)| *idx);
    let mut results: Vec<TestResult> = indexed_results.into_iter().map(|(_, r)| r).collect();

    // Run file-level teardown (always runs)
    if let Err(e) = run_teardown_steps(&file.teardown, &scope) {
        results.push(TestResult::failed(
            "<teardown>",
            format!("Teardown failed: {e}"),
        ));
    }

    CaseFileResult { tests: results }
}

fn matches_filter(test: &Test, filter: &str) -> bool {
    test.name.contains(filter) || test.id.as_deref() == Some(filter)
}

fn run_test(test: &Test, ctx: &SuiteContext, file_timeout: Option<u64>) -> TestResult {
    let start = Instant::now();
    let mut result = TestResult {
        name: test.name.clone(),
        id: test.id.clone(),
        passed: true,
        skipped: None,
        duration: Duration::ZERO,
        failures: Vec::new(),
    };

    let host = platform::current().kind();
    if let Some(reason) = &test.skip {
        result.skipped = Some(reason.clone());
    } else if !test.runs_on(host) {
        result.skipped = Some(format!("not supported on {host}"));
    }
    if result.skipped.is_some() {
        tracing::debug!(test = %test.name, reason = ?result.skipped, "skipped");
        return result;
    }

    let workspace = match test.workspace.as_ref().and_then(|w| w.template()) {
        Some(template) => match Workspace::create(&ctx.paths.output_dir, template) {
            Ok(workspace) => Some(workspace),
            Err(e) => {
                result.passed = false;
                result.failures.push(format!("Workspace creation failed: {e}"));
                result.duration = start.elapsed();
                return result;
            }
        },
        None => None,
    };

    let mut scope = ctx.scope();
    if let Some(workspace) = &workspace {
        scope = scope.with_workspace(workspace.path());
    }
    if let Some(item) = &test.item {
        scope = scope.with_item(item);
    }

    let timeout = test
        .timeout
        .or(file_timeout)
        .map(Duration::from_secs);

    match run_setup_steps(&test.setup, &scope) {
        Ok(()) => {
            let multi_step = test.steps.len() > 1;
            for step in &test.steps {
                let failures = run_step(step, &scope, timeout);
                if failures.is_empty() {
                    continue;
                }
                // Later steps build on earlier ones, so stop at the first failure
                result.failures.extend(failures.into_iter().map(|f| {
                    if multi_step {
                        format!("[{}] {f}", step.name)
                    } else {
                        f
                    }
                }));
                break;
            }
        }
        Err(e) => result.failures.push(format!("Test setup failed: {e}")),
    }

    // Test-level teardown (always runs)
    if let Err(e) = run_teardown_steps(&test.teardown, &scope) {
        result.failures.push(format!("Test teardown failed: {e}"));
    }
    if let Some(workspace) = &workspace {
        workspace.release();
    }

    result.passed = result.failures.is_empty();
    result.duration = start.elapsed();
    result
}

fn run_step(step: &Step, scope: &Scope<'_>, timeout: Option<Duration>) -> Vec<String> {
    let mut failures = Vec::new();

    if let Err(e) = run_setup_steps(&step.setup, scope) {
        failures.push(format!("Step setup failed: {e}"));
        return failures;
    }

    match execute(&step.run, scope, timeout) {
        Ok(executed) => {
            check_expectations(&step.expect, &executed, scope, timeout, &mut failures);
        }
        Err(e) => failures.push(e),
    }

    if let Err(e) = run_teardown_steps(&step.teardown, scope) {
        failures.push(format!("Step teardown failed: {e}"));
    }
    failures
}

/// A finished invocation and the directory it ran in.
struct Executed {
    invocation: CommandInvocation,
    cwd: PathBuf,
    output: CommandResult,
}

fn execute(run: &Run, scope: &Scope<'_>, timeout: Option<Duration>) -> Result<Executed, String> {
    let invocation = scope.invocation(&run.cmd, &run.args)?;
    let cwd = scope.cwd_for(run)?;
    let output = process::run_in(&invocation, Some(&cwd), timeout)
        .map_err(|e| format!("Command execution failed: {e}"))?;
    Ok(Executed {
        invocation,
        cwd,
        output,
    })
}

/// The exit and output expectations in effect for `version`.
fn effective<'a>(
    expect: &'a Expect,
    version: Option<&Version>,
) -> (Option<ExitExpect>, Option<&'a OutputMatch>) {
    let mut exit = expect.exit;
    let mut output = expect.output.as_ref();

    let Some(version) = version else {
        return (exit, output);
    };
    let matching = expect.versions.iter().find(|v| {
        VersionReq::parse(&v.requirement).is_ok_and(|requirement| requirement.matches(version))
    });
    if let Some(versioned) = matching {
        tracing::debug!(%version, requirement = %versioned.requirement, "using versioned expectation");
        exit = versioned.exit.or(exit);
        output = versioned.output.as_ref().or(output);
    }
    (exit, output)
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "no exit code".to_string(),
    }
}

fn check_expectations(
    expect: &Expect,
    executed: &Executed,
    scope: &Scope<'_>,
    timeout: Option<Duration>,
    failures: &mut Vec<String>,
) {
    let output = &executed.output;
    let (exit, matcher) = effective(expect, scope.ctx.zksolc_version.as_ref());

    match exit.unwrap_or(ExitExpect::Code(0)) {
        ExitExpect::Any(_) => {}
        ExitExpect::Code(expected_exit) => match output.exit_code {
            Some(actual_exit) => {
                if actual_exit != expected_exit {
                    failures.push(format!(
                        "Exit code: expected {expected_exit}, got {actual_exit}\n  output: {:?}",
                        output.output
                    ));
                }
            }
            None => failures.push(format!(
                "Exit code: expected {expected_exit}, but process did not terminate normally"
            )),
        },
    }

    if let Some(matcher) = matcher
        && let Err(e) = check_output_match("output", &output.output, matcher)
    {
        failures.push(e);
    }

    if let Some(reference) = &expect.reference {
        let args = match &reference.args {
            Some(args) => args
                .iter()
                .map(|arg| scope.resolve(arg))
                .collect::<Result<Vec<_>, _>>(),
            None => Ok(executed.invocation.arguments().to_vec()),
        };
        match args {
            Ok(args) => {
                let reference_invocation = CommandInvocation::new(scope.ctx.solc.clone(), args);
                // Same directory as the compiler under test, so relative arguments agree
                match process::run_in(&reference_invocation, Some(&executed.cwd), timeout) {
                    Ok(reference_output) => {
                        let expected = reference.exit.or(output.exit_code);
                        if reference_output.exit_code != expected {
                            failures.push(format!(
                                "Reference exit code: expected {}, got {}\n  output: {:?}",
                                describe_exit(expected),
                                describe_exit(reference_output.exit_code),
                                reference_output.output
                            ));
                        }
                    }
                    Err(e) => failures.push(format!("Reference execution failed: {e}")),
                }
            }
            Err(e) => failures.push(e),
        }
    }

    for file_expect in &expect.files {
        check_file_expect(file_expect, scope, timeout, failures);
    }
}

fn check_output_match(name: &str, actual: &str, matcher: &OutputMatch) -> Result<(), String> {
    match matcher {
        OutputMatch::Exact(expected) => {
            if actual != expected {
                Err(format!(
                    "{name}: expected exact match\n  expected: {expected:?}\n  got: {actual:?}"
                ))
            } else {
                Ok(())
            }
        }
        OutputMatch::Structured(s) => check_structured_match(name, actual, s),
    }
}

fn check_structured_match(
    name: &str,
    actual: &str,
    matcher: &OutputMatchStructured,
) -> Result<(), String> {
    if let Some(expected) = &matcher.equals
        && actual != expected
    {
        return Err(format!(
            "{name}: expected exact match\n  expected: {expected:?}\n  got: {actual:?}"
        ));
    }

    if let Some(substring) = &matcher.contains
        && !actual.contains(substring)
    {
        return Err(format!(
            "{name}: expected to contain {substring:?}\n  got: {actual:?}"
        ));
    }

    if let Some(pattern) = &matcher.regex {
        let re = regex::Regex::new(pattern)
            .map_err(|e| format!("{name}: invalid regex {pattern:?}: {e}"))?;
        if !re.is_match(actual) {
            return Err(format!(
                "{name}: expected to match regex {pattern:?}\n  got: {actual:?}"
            ));
        }
    }

    if let Some(pattern) = &matcher.not_regex {
        let re = regex::Regex::new(pattern)
            .map_err(|e| format!("{name}: invalid regex {pattern:?}: {e}"))?;
        if let Some(found) = re.find(actual) {
            return Err(format!(
                "{name}: expected not to match regex {pattern:?}, found {:?}\n  got: {actual:?}",
                found.as_str()
            ));
        }
    }

    Ok(())
}

fn check_file_expect(
    file_expect: &FileExpect,
    scope: &Scope<'_>,
    timeout: Option<Duration>,
    failures: &mut Vec<String>,
) {
    let path = match scope.resolve_path(&file_expect.path) {
        Ok(path) => path,
        Err(e) => {
            failures.push(e);
            return;
        }
    };

    if let Some(should_exist) = file_expect.exists {
        let exists = inspect::exists(&path);
        if should_exist && !exists {
            failures.push(format!("Path should exist: {}", path.display()));
            return;
        }
        if !should_exist && exists {
            failures.push(format!("Path should not exist: {}", path.display()));
            return;
        }
    }

    if let Some(should_be_empty) = file_expect.empty {
        match inspect::is_empty(&path) {
            Ok(empty) if empty != should_be_empty => {
                let expected = if should_be_empty { "empty" } else { "not empty" };
                failures.push(format!("Path should be {expected}: {}", path.display()));
            }
            Ok(_) => {}
            Err(e) => failures.push(e.to_string()),
        }
    }

    if let Some(run) = &file_expect.same_as_output_of {
        match execute(run, scope, timeout) {
            Ok(Executed { output, .. }) => match compare::same_content(&path, &output.output) {
                Ok(true) => {}
                Ok(false) => failures.push(format!(
                    "File {} and command output do not contain one another\n  output: {:?}",
                    path.display(),
                    output.output
                )),
                Err(e) => failures.push(format!("Failed to read {}: {e}", path.display())),
            },
            Err(e) => failures.push(e),
        }
    }
}

fn run_setup_steps(steps: &[SetupStep], scope: &Scope<'_>) -> Result<(), String> {
    for step in steps {
        run_setup_step(step, scope)?;
    }
    Ok(())
}

fn run_setup_step(step: &SetupStep, scope: &Scope<'_>) -> Result<(), String> {
    if let Some(write_file) = &step.write_file {
        let path = scope.resolve_path(&write_file.path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create directory: {e}"))?;
        }
        std::fs::write(&path, &write_file.contents)
            .map_err(|e| format!("Failed to write {}: {e}", path.display()))?;
    }

    if let Some(dir_path) = &step.create_dir {
        let path = scope.resolve_path(dir_path)?;
        std::fs::create_dir_all(&path)
            .map_err(|e| format!("Failed to create directory {}: {e}", path.display()))?;
    }

    if let Some(permission) = &step.set_permission {
        platform::set_permission(&scope.resolve_path(&permission.path)?, permission.mode);
    }

    if let Some(run) = &step.run {
        run_simple_command(run, scope)?;
    }

    Ok(())
}

fn run_teardown_steps(steps: &[TeardownStep], scope: &Scope<'_>) -> Result<(), String> {
    let mut errors = Vec::new();
    for step in steps {
        if let Err(e) = run_teardown_step(step, scope) {
            errors.push(e);
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

fn run_teardown_step(step: &TeardownStep, scope: &Scope<'_>) -> Result<(), String> {
    // Restore access first so a locked tree can still be removed
    if let Some(permission) = &step.set_permission {
        platform::set_permission(&scope.resolve_path(&permission.path)?, permission.mode);
    }

    if let Some(dir_path) = &step.remove_dir {
        let path = scope.resolve_path(dir_path)?;
        if path.exists() {
            std::fs::remove_dir_all(&path)
                .map_err(|e| format!("Failed to remove {}: {e}", path.display()))?;
        }
    }

    if let Some(run) = &step.run {
        run_simple_command(run, scope)?;
    }

    Ok(())
}

fn run_simple_command(run: &RunStep, scope: &Scope<'_>) -> Result<(), String> {
    let invocation = scope.invocation(&run.cmd, &run.args)?;
    let output = process::run_in(&invocation, Some(&scope.cwd), None)
        .map_err(|e| format!("Failed to run {invocation}: {e}"))?;

    if !output.success() {
        return Err(format!(
            "Command {invocation} failed with exit code {}: {}",
            describe_exit(output.exit_code),
            output.output
        ));
    }

    Ok(())
}

/// Load every case file under `path`, reporting files that fail to load as
/// failed results instead of aborting the run.
pub fn load_case_files(path: &Path) -> Result<Vec<(PathBuf, Result<CaseFile, String>)>, String> {
    let files = loader::find_case_files(path)
        .map_err(|e| format!("failed to find case files in {}: {e}", path.display()))?;
    Ok(files
        .into_iter()
        .map(|file| {
            let loaded = loader::load_case_file(&file).map_err(|e| e.to_string());
            (file, loaded)
        })
        .collect())
}
