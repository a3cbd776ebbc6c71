//! CLI tests for the hb binary

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn hb() -> Command {
    let mut cmd = Command::cargo_bin("hb").expect("binary should build");
    cmd.env_remove("HOBBIT_SESSION_ID")
        .env_remove("HOBBIT_RABBIT_HOST")
        .env_remove("RABBITMQ_PORT")
        .env_remove("BENCHMARK_PARAMETERS_MODEL");
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
    hb().arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--dataset"))
        .stdout(predicate::str::contains("--seed"))
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn test_missing_parameter_model_exits_non_zero() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = fast_fail_config(&dir);

    hb().arg("--config")
        .arg(&config)
        .env("HOBBIT_SESSION_ID", "cli-session")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read benchmark parameters"));
}

#[test]
fn test_missing_dataset_file_exits_non_zero() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = fast_fail_config(&dir);

    hb().arg("--config")
        .arg(&config)
        .arg("--dataset")
        .arg(dir.path().join("absent.csv"))
        .arg("--seed")
        .arg("1")
        .env("HOBBIT_SESSION_ID", "cli-session")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load dataset"));
}

#[test]
fn test_unreachable_broker_exits_non_zero() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = fast_fail_config(&dir);
    let dataset = dir.path().join("wine.csv");
    fs::write(&dataset, "a;quality\n1;5\n2;6\n").expect("Failed to write dataset");

    hb().arg("--config")
        .arg(&config)
        .arg("--dataset")
        .arg(&dataset)
        .arg("--seed")
        .arg("1")
        .env("HOBBIT_SESSION_ID", "cli-session")
        .env("HOBBIT_RABBIT_HOST", "127.0.0.1")
        .env("RABBITMQ_PORT", "1")
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not connect to the broker"));
}
