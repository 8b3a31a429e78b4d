//! Integration tests for running suites against stand-in compilers.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Output};
use std::time::Instant;
use tempfile::TempDir;

/// Answers like zksolc for the handful of flags these tests use.
const ZKSOLC: &str = r#"#!/bin/sh
input=""
out=""
bin=0
while [ $# -gt 0 ]; do
  case "$1" in
    --version) echo "zksolc, the ZKsync Solidity compiler v1.5.7"; exit 0 ;;
    --bin) bin=1 ;;
    --output-dir) shift; out="$1" ;;
    --slow) sleep 0.3 ;;
    --fail) echo "Error: compilation failed" >&2; exit 1 ;;
    -*) ;;
    *) input="$1" ;;
  esac
  shift
done
if [ -z "$input" ]; then
  echo "No input sources specified." >&2
  echo "Error(s) found. Compilation aborted" >&2
  exit 1
fi
if [ -n "$out" ]; then
  mkdir -p "$out/contract.sol"
  printf '0x0000' > "$out/contract.sol/C.zbin"
  echo "Compiler run successful. Artifact(s) can be found in directory \"$out\"."
  exit 0
fi
if [ "$bin" = 1 ]; then
  echo "======= $input:C ======="
  echo "Bytecode: 0x0000"
  exit 0
fi
echo "Compiler run successful. No output requested. Use --asm and --bin flags."
"#;

/// Fails without an input file, succeeds otherwise.
const SOLC: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    --fail) exit 1 ;;
    -*) ;;
    *) exit 0 ;;
  esac
done
exit 1
"#;

fn zksolc_cli_tests_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_zksolc-cli-tests"))
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Create a suite root with stand-in compilers, a Solidity fixture and a config.
fn suite(config: &str) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    fs::create_dir_all(root.join("bin")).unwrap();
    let zksolc = root.join("bin/zksolc");
    let solc = root.join("bin/solc");
    write_script(&zksolc, ZKSOLC);
    write_script(&solc, SOLC);

    fs::create_dir_all(root.join("contracts/solidity")).unwrap();
    fs::write(
        root.join("contracts/solidity/contract.sol"),
        "contract C {}\n",
    )
    .unwrap();

    fs::write(
        root.join("cli-tests.yaml"),
        format!(
            "version: 1\nzksolc: {}\nsolc: {}\n{config}",
            zksolc.display(),
            solc.display()
        ),
    )
    .unwrap();
    fs::create_dir_all(root.join("cases")).unwrap();
    temp_dir
}

fn write_case(root: &Path, name: &str, contents: &str) {
    fs::write(root.join("cases").join(name), contents).unwrap();
}

fn run(root: &Path, extra: &[&str]) -> Output {
    zksolc_cli_tests_cmd()
        .arg("run")
        .arg(root.join("cases"))
        .args(extra)
        .output()
        .unwrap()
}

fn describe(output: &Output) -> String {
    format!(
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

const BIN_CASES: &str = r#"version: 1
description: Set of --bin tests
tests:
  - name: bin by default
    id: "1747"
    run:
      args: ["${contracts.solidity}", "--bin"]
    expect:
      exit: 0
      output:
        regex: '(?i)bytecode: 0x'
      reference: {}

  - name: bin without input
    id: "1747"
    run:
      args: ["--bin"]
    expect:
      exit: 1
      output:
        regex: 'No input sources specified\.\s*Error\(s\) found\. Compilation aborted'
      reference: {}

  - name: bin with library
    skip: no library fixture
    run:
      args: ["${contracts.solidity}", "--libraries"]
"#;

/// Create a case file whose single test takes 0.3 seconds.
fn slow_case(name: &str) -> String {
    format!(
        r#"version: 1
tests:
  - name: {name}
    run:
      args: ["${{contracts.solidity}}", "--slow"]
"#
    )
}

#[test]
fn test_passing_suite_exits_successfully() {
    let temp_dir = suite("");
    write_case(temp_dir.path(), "bin.yaml", BIN_CASES);

    let output = run(temp_dir.path(), &[]);
    assert!(output.status.success(), "{}", describe(&output));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("✓ bin by default [#1747]"), "{stdout}");
    assert!(stdout.contains("✓ bin without input [#1747]"), "{stdout}");
    assert!(stdout.contains("○ bin with library"), "{stdout}");
    assert!(stdout.contains("2 passed, 0 failed, 1 skipped"), "{stdout}");
}

#[test]
fn test_failing_expectation_fails_the_run() {
    let temp_dir = suite("");
    write_case(
        temp_dir.path(),
        "failing.yaml",
        r#"version: 1
tests:
  - name: broken build
    run:
      args: ["${contracts.solidity}", "--fail"]
    expect:
      exit: 0
"#,
    );

    let output = run(temp_dir.path(), &[]);
    assert!(!output.status.success(), "{}", describe(&output));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("✗ broken build"), "{stdout}");
    assert!(stdout.contains("Exit code: expected 0, got 1"), "{stdout}");
    assert!(stdout.contains("0 passed, 1 failed, 0 skipped"), "{stdout}");
}

#[test]
fn test_reference_mismatch_is_reported() {
    let temp_dir = suite("");
    write_case(
        temp_dir.path(),
        "parity.yaml",
        r#"version: 1
tests:
  - name: solc disagrees
    run:
      args: ["${contracts.solidity}", "--bin"]
    expect:
      reference:
        exit: 1
"#,
    );

    let output = run(temp_dir.path(), &[]);
    assert!(!output.status.success(), "{}", describe(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Reference exit code: expected 1, got 0"),
        "{stdout}"
    );
}

#[test]
fn test_json_output_counts_results() {
    let temp_dir = suite("");
    write_case(temp_dir.path(), "bin.yaml", BIN_CASES);

    let output = run(temp_dir.path(), &["--output", "json"]);
    assert!(output.status.success(), "{}", describe(&output));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["passed"], 2);
    assert_eq!(report["failed"], 0);
    assert_eq!(report["skipped"], 1);

    let tests = &report["results"][0]["tests"];
    assert_eq!(tests[0]["name"], "bin by default");
    assert_eq!(tests[0]["id"], "1747");
    assert_eq!(tests[2]["skipped"], "no library fixture");
}

#[test]
fn test_junit_output_marks_skipped_tests() {
    let temp_dir = suite("");
    write_case(temp_dir.path(), "bin.yaml", BIN_CASES);

    let output = run(temp_dir.path(), &["--output", "junit"]);
    assert!(output.status.success(), "{}", describe(&output));

    let xml = String::from_utf8_lossy(&output.stdout);
    assert!(xml.starts_with("<?xml"), "{xml}");
    assert!(
        xml.contains("<testsuites tests=\"3\" failures=\"0\" skipped=\"1\""),
        "{xml}"
    );
    assert!(
        xml.contains("<skipped message=\"no library fixture\"/>"),
        "{xml}"
    );
}

#[test]
fn test_filter_selects_by_id_and_name() {
    let temp_dir = suite("");
    write_case(temp_dir.path(), "bin.yaml", BIN_CASES);
    write_case(
        temp_dir.path(),
        "other.yaml",
        r#"version: 1
tests:
  - name: would fail
    id: "9999"
    run:
      args: ["--fail"]
"#,
    );

    let output = run(temp_dir.path(), &["--filter", "1747"]);
    assert!(output.status.success(), "{}", describe(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 passed, 0 failed, 0 skipped"), "{stdout}");
    assert!(!stdout.contains("would fail"), "{stdout}");

    let output = run(temp_dir.path(), &["--filter", "without input"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1 passed, 0 failed, 0 skipped"), "{stdout}");
}

#[test]
fn test_compiler_flags_override_config() {
    let temp_dir = suite("");
    write_case(temp_dir.path(), "bin.yaml", BIN_CASES);

    // `false` fails every invocation, so the expected-success test breaks
    let output = run(temp_dir.path(), &["--zksolc", "false"]);
    assert!(!output.status.success(), "{}", describe(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("✗ bin by default"), "{stdout}");
}

#[test]
fn test_workspace_artifacts_are_checked_and_removed() {
    let temp_dir = suite("");
    write_case(
        temp_dir.path(),
        "output-dir.yaml",
        r#"version: 1
tests:
  - name: bin artifact in output directory
    workspace: true
    run:
      args: ["${contracts.solidity}", "--bin", "--output-dir", "'${workspace}'"]
    expect:
      output:
        regex: 'Compiler run successful\. Artifact\(s\) can be found in directory'
        not_regex: '[Ee]rror|[Ww]arning|[Ff]ail'
      files:
        - path: ${workspace}
          exists: true
        - path: ${workspace}/${file.solidity}/${artifact.bin}
          exists: true
          empty: false
          same_as_output_of:
            args: ["${contracts.solidity}", "--bin"]
"#,
    );

    let output = run(temp_dir.path(), &[]);
    assert!(output.status.success(), "{}", describe(&output));

    let artifacts = temp_dir.path().join("artifacts");
    assert!(artifacts.is_dir());
    assert_eq!(
        fs::read_dir(&artifacts).unwrap().count(),
        0,
        "workspace left behind in {}",
        artifacts.display()
    );
}

#[test]
fn test_load_error_fails_the_run() {
    let temp_dir = suite("");
    write_case(temp_dir.path(), "bin.yaml", BIN_CASES);
    write_case(temp_dir.path(), "broken.yaml", "version: 1\ntests:\n  - name: x\n");

    let output = run(temp_dir.path(), &[]);
    assert!(!output.status.success(), "{}", describe(&output));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to load"), "{stderr}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 passed, 1 failed, 1 skipped"), "{stdout}");
}

#[test]
fn test_files_run_in_parallel_by_default() {
    let temp_dir = suite("zksolc_version: 1.5.7\n");
    write_case(temp_dir.path(), "slow1.yaml", &slow_case("slow1"));
    write_case(temp_dir.path(), "slow2.yaml", &slow_case("slow2"));

    let start = Instant::now();
    let output = run(temp_dir.path(), &[]);
    let elapsed = start.elapsed();
    assert!(output.status.success(), "{}", describe(&output));

    // Parallel takes ~0.3s, serial would take ~0.6s
    assert!(
        elapsed.as_secs_f64() < 0.8,
        "Files took {:.2}s to run (expected < 0.8s for parallel execution)",
        elapsed.as_secs_f64()
    );
}

#[test]
fn test_files_run_serially_when_configured() {
    let temp_dir = suite("zksolc_version: 1.5.7\nserial: true\n");
    write_case(temp_dir.path(), "slow1.yaml", &slow_case("slow1"));
    write_case(temp_dir.path(), "slow2.yaml", &slow_case("slow2"));

    let start = Instant::now();
    let output = run(temp_dir.path(), &[]);
    let elapsed = start.elapsed();
    assert!(output.status.success(), "{}", describe(&output));

    assert!(
        elapsed.as_secs_f64() >= 0.55,
        "Files took {:.2}s to run (expected >= 0.55s for serial execution)",
        elapsed.as_secs_f64()
    );
}

#[test]
fn test_results_keep_file_order() {
    let temp_dir = suite("");
    for (file, name) in [("a_first.yaml", "test_a"), ("b_second.yaml", "test_b"), ("c_third.yaml", "test_c")] {
        write_case(
            temp_dir.path(),
            file,
            &format!(
                "version: 1\ntests:\n  - name: {name}\n    run:\n      args: [\"${{contracts.solidity}}\"]\n"
            ),
        );
    }

    let output = run(temp_dir.path(), &[]);
    assert!(output.status.success(), "{}", describe(&output));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let pos_a = stdout.find("test_a").expect("test_a not found");
    let pos_b = stdout.find("test_b").expect("test_b not found");
    let pos_c = stdout.find("test_c").expect("test_c not found");
    assert!(
        pos_a < pos_b && pos_b < pos_c,
        "Results not in expected order:\n{stdout}"
    );
}

#[test]
fn test_versioned_expectations_use_detected_version() {
    let temp_dir = suite("");
    write_case(
        temp_dir.path(),
        "versions.yaml",
        r#"version: 1
tests:
  - name: wording differs by release
    run:
      args: ["${contracts.solidity}"]
    expect:
      output:
        contains: "wording that older releases printed"
      versions:
        - requirement: ">=1.5.0"
          output:
            contains: "No output requested"
"#,
    );

    let output = run(temp_dir.path(), &["--verbose"]);
    assert!(output.status.success(), "{}", describe(&output));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("(v1.5.7)"), "{stderr}");
}
