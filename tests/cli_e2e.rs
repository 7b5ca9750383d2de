//! End-to-end CLI tests for the pagegrab binary.
//!
//! None of these reach a browser: they cover help output, settings handling
//! and the offline `--clean-only` mode.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn pagegrab(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pagegrab").unwrap();
    cmd.current_dir(dir.path()).env_remove("RUST_LOG");
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let dir = TempDir::new().unwrap();
    pagegrab(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Drive a browser"))
        .stdout(predicate::str::contains("--output-dir"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let dir = TempDir::new().unwrap();
    pagegrab(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pagegrab"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let dir = TempDir::new().unwrap();
    pagegrab(&dir)
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_missing_output_directory_is_reported() {
    let dir = TempDir::new().unwrap();
    pagegrab(&dir)
        .arg("https://example.com/a.zip")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no output directory configured"));
}

#[test]
fn test_clean_only_removes_incomplete_files() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();
    std::fs::write(out.join("movie.rar.crdownload"), b"partial").unwrap();
    std::fs::write(out.join("keep.pdf"), b"done").unwrap();

    pagegrab(&dir)
        .args(["--clean-only", "-o"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("removed movie.rar.crdownload"))
        .stdout(predicate::str::contains("1 incomplete file(s) removed"));

    assert!(!out.join("movie.rar.crdownload").exists());
    assert!(out.join("keep.pdf").exists());
}

#[test]
fn test_invalid_settings_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("pagegrab.json"),
        r#"{ "output_directory": "out", "max_wait_seconds": 0 }"#,
    )
    .unwrap();

    pagegrab(&dir)
        .arg("--clean-only")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_wait_seconds"));
}

#[test]
fn test_save_config_writes_effective_settings() {
    let dir = TempDir::new().unwrap();
    pagegrab(&dir)
        .args(["--save-config", "--clean-only", "-o", "out", "--max-wait", "42"])
        .assert()
        .success();

    let saved = std::fs::read_to_string(dir.path().join("pagegrab.json")).unwrap();
    assert!(saved.contains("\"max_wait_seconds\": 42"), "{saved}");
    assert!(saved.contains("\"output_directory\": \"out\""), "{saved}");
}

#[test]
fn test_no_input_exits_cleanly() {
    let dir = TempDir::new().unwrap();
    pagegrab(&dir)
        .args(["-o", "out"])
        .write_stdin("")
        .assert()
        .success();
}
