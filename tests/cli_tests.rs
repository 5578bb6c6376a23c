//! Integration tests for the CLI interface
//!
//! Runs the binary against workflow definitions written to temp folders.

mod common;

use assert_cmd::Command;
use common::write_definition;
use predicates::prelude::*;
use tempfile::TempDir;

const ECHO_WORKFLOW: &str = r#"
label: Echo
title: Echo {word}
steps:
  - label: Say the word
    run: "sh -c 'echo {word}'"
    capture: echo
"#;

fn installer(logs: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dk-installer").unwrap();
    cmd.arg("--logs-dir").arg(logs.path());
    cmd
}

#[test]
fn test_cli_help_lists_commands() {
    let mut cmd = Command::cargo_bin("dk-installer").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("dk-installer").unwrap();
    cmd.arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_validate_definition() {
    let dir = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    let definition = write_definition(&dir, ECHO_WORKFLOW);

    installer(&logs)
        .arg("validate")
        .arg(&definition)
        .args(["--set", "word=hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Workflow 'Echo' is valid"))
        .stdout(predicate::str::contains("Say the word"));
}

#[test]
fn test_missing_variable_is_an_abort() {
    let dir = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    let definition = write_definition(&dir, ECHO_WORKFLOW);

    installer(&logs)
        .arg("validate")
        .arg(&definition)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Variable 'word' is not set"));
}

#[test]
fn test_missing_definition_is_an_abort() {
    let logs = TempDir::new().unwrap();
    installer(&logs)
        .args(["run", "/nonexistent/workflow.yml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Could not read workflow definition"));
}

#[test]
fn test_run_succeeds_and_archives_logs() {
    let dir = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    let definition = write_definition(&dir, ECHO_WORKFLOW);

    installer(&logs)
        .arg("run")
        .arg(&definition)
        .args(["--set", "word=hello", "--prefix", "echo-test"])
        .assert()
        .success()
        .stdout(predicate::str::contains("== Echo hello"))
        .stdout(predicate::str::contains("   | hello"))
        .stdout(predicate::str::contains("Say the word... OK"))
        .stdout(predicate::str::contains("== Echo SUCCEEDED"));

    let archives = std::fs::read_dir(logs.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("echo-test-") && name.ends_with(".zip"))
        .count();
    assert_eq!(archives, 1);
    assert!(logs.path().join("latest").exists());
}

#[test]
fn test_failed_step_exits_with_unexpected_status() {
    let dir = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    let definition = write_definition(
        &dir,
        r#"
label: Broken
steps:
  - label: Fail loudly
    run: ["sh", "-c", "echo 'cannot reach registry' >&2; exit 4"]
"#,
    );

    installer(&logs)
        .arg("run")
        .arg(&definition)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Fail loudly... FAILED"))
        .stdout(predicate::str::contains("cannot reach registry"))
        .stdout(predicate::str::contains("An unexpected error occurred"));
}

#[test]
fn test_unmet_requirement_exits_with_abort_status() {
    let dir = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    let definition = write_definition(
        &dir,
        r#"
label: Needs tools
requirements:
  - name: Missing tool
    probe: "dk-installer-missing-tool --version"
steps:
  - label: Never runs
    run: "sh -c 'echo ran'"
    capture: echo
"#,
    );

    installer(&logs)
        .arg("run")
        .arg(&definition)
        .assert()
        .code(1)
        .stdout(predicate::str::contains(
            "The installer could not verify that 'Missing tool' is available.",
        ))
        .stdout(predicate::str::contains("Not all requirements are fulfilled"))
        .stdout(predicate::str::contains("   | ran").not());
}
