//! CLI tests for the hs binary

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn hs() -> Command {
    let mut cmd = Command::cargo_bin("hs").expect("binary should build");
    cmd.env_remove("HOBBIT_SESSION_ID")
        .env_remove("HOBBIT_RABBIT_HOST")
        .env_remove("RABBITMQ_PORT");
    cmd
}

fn fast_fail_config(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("hobbit.yml");
    fs::write(
        &path,
        "log-level: warn\nconnection:\n  max-attempts: 2\n  retry-interval-ms: 10\n",
    )
    .expect("Failed to write config");
    path
}

#[test]
fn test_help_lists_flags() {
    hs().arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--log-level"));
}

#[test]
fn test_missing_session_id_exits_non_zero() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = fast_fail_config(&dir);

    hs().arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("HOBBIT_SESSION_ID"));
}

#[test]
fn test_unreachable_broker_exits_non_zero() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = fast_fail_config(&dir);

    hs().arg("--config")
        .arg(&config)
        .env("HOBBIT_SESSION_ID", "cli-session")
        .env("HOBBIT_RABBIT_HOST", "127.0.0.1")
        .env("RABBITMQ_PORT", "1")
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not connect to the broker"));
}
