use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};
use zksolc_cli_tests::loader;
use zksolc_cli_tests::paths::PathSet;
use zksolc_cli_tests::runner::{self, CaseFileResult, SuiteContext, TestResult};
use zksolc_cli_tests::schema::{self, SuiteConfig};
use zksolc_cli_tests::workspace::CleanupGuard;

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with checkmarks
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// JUnit XML output for CI systems
    Junit,
}

#[derive(Parser)]
#[command(name = "zksolc-cli-tests")]
#[command(about = "Conformance tests for the zksolc command line interface")]
#[command(version)]
struct Cli {
    /// Log filter for diagnostics on stderr, e.g. "debug" or "zksolc_cli_tests=trace"
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute case files
    Run {
        /// Path to case files (suite directory, case directory or file)
        path: PathBuf,
        /// Compiler under test (overrides suite config)
        #[arg(long)]
        zksolc: Option<String>,
        /// Reference compiler (overrides suite config)
        #[arg(long)]
        solc: Option<String>,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
        /// Filter tests by name (substring match) or id
        #[arg(short, long)]
        filter: Option<String>,
        /// Show verbose output (invocations, skip reasons)
        #[arg(short, long)]
        verbose: bool,
    },
    /// Validate case files without running them
    Validate {
        /// Path to case files (file or directory)
        path: PathBuf,
    },
    /// Scaffold a new case file
    Init {
        /// Output path for the new case file
        #[arg(default_value = "cases/example.yaml")]
        path: PathBuf,
    },
    /// Output the case file schema
    Schema,
    /// Print the resolved fixture and artifact paths of a suite
    Paths {
        /// Suite root
        #[arg(default_value = ".")]
        root: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match &cli.command {
        Command::Run { verbose: true, .. } if cli.log_level == "warn" => "debug",
        _ => cli.log_level.as_str(),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    // Workspaces leaked by a failing run are removed when this goes out of scope
    let _cleanup = CleanupGuard;

    match cli.command {
        Command::Run {
            path,
            zksolc,
            solc,
            output,
            filter,
            verbose,
        } => run(
            &path,
            zksolc.as_deref(),
            solc.as_deref(),
            output,
            filter.as_deref(),
            verbose,
        ),
        Command::Validate { path } => validate(&path),
        Command::Init { path } => init(&path),
        Command::Schema => {
            let schema = schema::generate_schema();
            match serde_json::to_string_pretty(&schema) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error serializing schema: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Paths { root } => paths(&root),
    }
}

fn load_config(root: &Path) -> Result<SuiteConfig, ExitCode> {
    match loader::load_suite_config(root) {
        Ok(config) => Ok(config.unwrap_or_default()),
        Err(e) => {
            eprintln!("Error loading suite config: {e}");
            Err(ExitCode::FAILURE)
        }
    }
}

fn run(
    path: &Path,
    zksolc: Option<&str>,
    solc: Option<&str>,
    output: OutputFormat,
    filter: Option<&str>,
    verbose: bool,
) -> ExitCode {
    if verbose && let Some(f) = filter {
        eprintln!("Filtering tests by: {f:?}");
    }

    let suite_root = loader::find_suite_root(path);
    let suite_config = match load_config(&suite_root) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let ctx = match SuiteContext::from_config(&suite_root, &suite_config, zksolc, solc) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error resolving suite root {}: {e}", suite_root.display());
            return ExitCode::FAILURE;
        }
    };
    if verbose {
        eprintln!("Suite root: {}", ctx.paths.root.display());
        match &ctx.zksolc_version {
            Some(version) => eprintln!("zksolc: {} (v{version})", ctx.zksolc),
            None => eprintln!("zksolc: {} (version unknown)", ctx.zksolc),
        }
        eprintln!("solc: {}", ctx.solc);
    }

    // Load all case files first, tracking any load failures
    let case_files = match runner::load_case_files(path) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("Error finding case files: {e}");
            return ExitCode::FAILURE;
        }
    };
    if case_files.is_empty() {
        eprintln!("No case files found at: {}", path.display());
        return ExitCode::FAILURE;
    }

    if let Err(e) = runner::run_suite_setup(&suite_config, &ctx) {
        eprintln!("Suite setup failed: {e}");
        return ExitCode::FAILURE;
    }

    let run_start = Instant::now();

    // Run case files (parallel by default, serial if configured)
    let ctx_ref = &ctx;
    let file_results: Vec<(PathBuf, Result<CaseFileResult, String>)> = if suite_config.serial {
        case_files
            .into_iter()
            .map(|(path, loaded)| {
                let result = loaded.map(|file| runner::run_case_file_filtered(&file, ctx_ref, filter));
                (path, result)
            })
            .collect()
    } else {
        thread::scope(|s| {
            let handles: Vec<_> = case_files
                .into_iter()
                .map(|(path, loaded)| {
                    let handle = s.spawn(move || {
                        loaded.map(|file| runner::run_case_file_filtered(&file, ctx_ref, filter))
                    });
                    (path, handle)
                })
                .collect();

            // Joining in spawn order keeps the sorted file order
            handles
                .into_iter()
                .map(|(path, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|_| Err("case file thread panicked".to_string()));
                    (path, result)
                })
                .collect()
        })
    };

    let mut json_results = Vec::new();
    let mut junit_results = Vec::new();
    let mut total_passed = 0;
    let mut total_failed = 0;
    let mut total_skipped = 0;

    for (case_path, result) in file_results {
        let (file_result, loaded) = match result {
            Ok(file_result) => (file_result, true),
            Err(e) => {
                if matches!(output, OutputFormat::Human) {
                    eprintln!("✗ Failed to load {}: {e}", case_path.display());
                }
                total_failed += 1;
                // For JSON and JUnit, report the load error as a failed test
                let load_failure = TestResult {
                    name: "<load>".to_string(),
                    id: None,
                    passed: false,
                    skipped: None,
                    duration: Duration::ZERO,
                    failures: vec![format!("Failed to load case file: {e}")],
                };
                (
                    CaseFileResult {
                        tests: vec![load_failure],
                    },
                    false,
                )
            }
        };

        if loaded {
            for test in &file_result.tests {
                if test.skipped.is_some() {
                    total_skipped += 1;
                } else if test.passed {
                    total_passed += 1;
                } else {
                    total_failed += 1;
                }
            }
        }

        match output {
            OutputFormat::Human => {
                if loaded {
                    print_human(&case_path, &file_result, verbose);
                }
            }
            OutputFormat::Json => {
                json_results.push(serde_json::json!({
                    "file": case_path.display().to_string(),
                    "tests": file_result.tests,
                }));
            }
            OutputFormat::Junit => {
                let total_time: Duration = file_result.tests.iter().map(|t| t.duration).sum();
                junit_results.push(JunitFileResult {
                    file: case_path.display().to_string(),
                    tests: file_result.tests,
                    total_time,
                });
            }
        }
    }

    // Run suite-level teardown (always runs)
    if let Err(e) = runner::run_suite_teardown(&suite_config, &ctx) {
        if matches!(output, OutputFormat::Human) {
            eprintln!("Suite teardown failed: {e}");
        }
        total_failed += 1;
    }

    let total_time = run_start.elapsed();

    match output {
        OutputFormat::Human => {
            println!("\n{total_passed} passed, {total_failed} failed, {total_skipped} skipped");
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "passed": total_passed,
                "failed": total_failed,
                "skipped": total_skipped,
                "results": json_results,
            });
            match serde_json::to_string_pretty(&output) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing results: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        OutputFormat::Junit => {
            print!("{}", format_junit_xml(&junit_results, total_time));
        }
    }

    if total_failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_human(case_path: &Path, file_result: &CaseFileResult, verbose: bool) {
    println!("\n{}", case_path.display());
    for test in &file_result.tests {
        let name = match &test.id {
            Some(id) => format!("{} [#{id}]", test.name),
            None => test.name.clone(),
        };
        if let Some(reason) = &test.skipped {
            if verbose {
                println!("  ○ {name} (skipped: {reason})");
            } else {
                println!("  ○ {name} (skipped)");
            }
        } else if test.passed {
            println!("  ✓ {name} ({:.2?})", test.duration);
        } else {
            println!("  ✗ {name} ({:.2?})", test.duration);
            for failure in &test.failures {
                println!("    {failure}");
            }
        }
    }
}

fn validate(path: &Path) -> ExitCode {
    let files = match loader::find_case_files(path) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("Error finding case files: {e}");
            return ExitCode::FAILURE;
        }
    };

    if files.is_empty() {
        eprintln!("No case files found at: {}", path.display());
        return ExitCode::FAILURE;
    }

    let mut errors = 0;
    for case_path in &files {
        match loader::load_case_file(case_path) {
            Ok(file) => {
                let problems = loader::validate_case_file(&file);
                if problems.is_empty() {
                    println!("✓ {} ({} tests)", case_path.display(), file.tests.len());
                } else {
                    eprintln!("✗ {}", case_path.display());
                    for problem in &problems {
                        eprintln!("    {problem}");
                    }
                    errors += 1;
                }
            }
            Err(e) => {
                eprintln!("✗ {}: {e}", case_path.display());
                errors += 1;
            }
        }
    }

    if errors > 0 {
        eprintln!("\n{errors} case file(s) failed validation");
        return ExitCode::FAILURE;
    }
    println!("\nAll {} case file(s) valid", files.len());
    ExitCode::SUCCESS
}

fn init(path: &Path) -> ExitCode {
    let template = r#"version: 1
description: Set of --bin tests

tests:
  - name: bin by default
    run:
      cmd: zksolc
      args: ["${contracts.solidity}", "--bin"]
    expect:
      exit: 0
      output:
        regex: "(?i)bytecode: 0x"
      # solc must exit with the same code
      reference: {}

  - name: bin artifact is written
    workspace: true
    run:
      args: ["${contracts.solidity}", "--bin", "--output-dir", "${workspace}"]
    expect:
      output:
        contains: "Compiler run successful"
      files:
        - path: ${workspace}/${file.solidity}/${artifact.bin}
          exists: true
          empty: false
"#;
    if path.exists() {
        eprintln!("Error: file already exists: {}", path.display());
        return ExitCode::FAILURE;
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
        && let Err(e) = fs::create_dir_all(parent)
    {
        eprintln!("Error creating directory: {e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = fs::write(path, template) {
        eprintln!("Error writing file: {e}");
        return ExitCode::FAILURE;
    }
    println!("Created: {}", path.display());
    ExitCode::SUCCESS
}

fn paths(root: &Path) -> ExitCode {
    let config = match load_config(root) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let root = match std::path::absolute(root) {
        Ok(root) => root,
        Err(e) => {
            eprintln!("Error resolving {}: {e}", root.display());
            return ExitCode::FAILURE;
        }
    };
    let paths = PathSet::new(&root, &config.contracts_dir, &config.output_dir);
    for (name, value) in paths.placeholders() {
        println!("{name} = {value}");
    }
    ExitCode::SUCCESS
}

/// A file result for JUnit output.
struct JunitFileResult {
    file: String,
    tests: Vec<TestResult>,
    total_time: Duration,
}

/// Format test results as JUnit XML.
fn format_junit_xml(results: &[JunitFileResult], total_time: Duration) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    let all_tests = || results.iter().flat_map(|r| &r.tests);
    let total_tests = all_tests().count();
    let total_failures = all_tests().filter(|t| !t.passed).count();
    let total_skipped = all_tests().filter(|t| t.skipped.is_some()).count();

    let _ = writeln!(
        xml,
        "<testsuites tests=\"{total_tests}\" failures=\"{total_failures}\" skipped=\"{total_skipped}\" time=\"{:.3}\">",
        total_time.as_secs_f64()
    );

    for file_result in results {
        let tests = file_result.tests.len();
        let failures = file_result.tests.iter().filter(|t| !t.passed).count();
        let skipped = file_result
            .tests
            .iter()
            .filter(|t| t.skipped.is_some())
            .count();

        let _ = writeln!(
            xml,
            "  <testsuite name=\"{}\" tests=\"{tests}\" failures=\"{failures}\" skipped=\"{skipped}\" time=\"{:.3}\">",
            escape_xml(&file_result.file),
            file_result.total_time.as_secs_f64()
        );

        for test in &file_result.tests {
            let _ = writeln!(
                xml,
                "    <testcase name=\"{}\" time=\"{:.3}\">",
                escape_xml(&test.name),
                test.duration.as_secs_f64()
            );

            if let Some(reason) = &test.skipped {
                let _ = writeln!(xml, "      <skipped message=\"{}\"/>", escape_xml(reason));
            } else if !test.passed {
                let message = test
                    .failures
                    .first()
                    .map(|s| s.as_str())
                    .unwrap_or("Test failed");
                let _ = writeln!(xml, "      <failure message=\"{}\">", escape_xml(message));
                for failure in &test.failures {
                    let _ = writeln!(xml, "{}", escape_xml(failure));
                }
                xml.push_str("      </failure>\n");
            }

            xml.push_str("    </testcase>\n");
        }

        xml.push_str("  </testsuite>\n");
    }

    xml.push_str("</testsuites>\n");
    xml
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
