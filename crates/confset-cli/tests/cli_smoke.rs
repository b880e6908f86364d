//! CLI binary smoke tests using assert_cmd.
//!
//! These tests run the compiled `confset` binary end to end: argument
//! parsing, config loading, calibration and the written output file.

use std::fmt::Write as _;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn cmd() -> Command {
    Command::cargo_bin("confset").unwrap()
}

/// Three well separated classes on a 3x3 grid of jittered points.
fn write_dataset(path: &Path, n: usize, with_label: bool) {
    let mut out = String::from(if with_label { "f1,f2,label\n" } else { "f1,f2\n" });
    for i in 0..n {
        let class = i % 3;
        let jitter = ((i * 7919) % 97) as f64 / 97.0 - 0.5;
        let (cx, cy) = [(0.0, 0.0), (5.0, 0.0), (0.0, 5.0)][class];
        write!(out, "{},{}", cx + jitter, cy - jitter).unwrap();
        if with_label {
            write!(out, ",{}", class).unwrap();
        }
        out.push('\n');
    }
    std::fs::write(path, out).unwrap();
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("config.json");
    std::fs::write(&path, body).unwrap();
    path
}

// ---------------------------------------------------------------------------
// Top-level
// ---------------------------------------------------------------------------

#[test]
fn no_args_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_flag_lists_subcommands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("predict"))
        .stdout(predicate::str::contains("defaults"));
}

#[test]
fn version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("confset"));
}

#[test]
fn defaults_prints_json_template() {
    cmd()
        .arg("defaults")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"calibration_data\""))
        .stdout(predicate::str::contains("\"include_last_label\": true"));
}

// ---------------------------------------------------------------------------
// Predict subcommand
// ---------------------------------------------------------------------------

#[test]
fn predict_requires_config() {
    cmd().arg("predict").assert().failure();
}

#[test]
fn predict_nonexistent_config_errors() {
    cmd()
        .args(["predict", "/nonexistent/config.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn predict_rejects_unknown_method() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "{}");
    cmd()
        .arg("predict")
        .arg(&config)
        .args(["--method", "bootstrap"])
        .assert()
        .failure();
}

#[test]
fn predict_writes_sets_per_alpha() {
    let dir = tempfile::tempdir().unwrap();
    let calib = dir.path().join("calib.csv");
    let test = dir.path().join("test.csv");
    let output = dir.path().join("sets.tsv");
    write_dataset(&calib, 90, true);
    write_dataset(&test, 12, true);

    let config = write_config(
        dir.path(),
        &format!(
            r#"{{
                "classifier": {{"method": {{"name": "aps"}}, "cv": {{"name": "split", "test_size": 0.5}}, "random_state": 3}},
                "alpha": [0.1, 0.3],
                "calibration_data": "{}",
                "test_data": "{}"
            }}"#,
            calib.display(),
            test.display()
        ),
    );

    cmd()
        .arg("predict")
        .arg(&config)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();

    let written = std::fs::read_to_string(&output).unwrap();
    let mut lines = written.lines();
    assert_eq!(
        lines.next().unwrap(),
        "row\ty_pred\tset_alpha_0.1\tset_alpha_0.3"
    );
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 12);
    for row in rows {
        let fields: Vec<&str> = row.split('\t').collect();
        assert_eq!(fields.len(), 4);
        assert!(fields[2].split(';').any(|label| label == fields[1]) || fields[2].is_empty());
    }
}

#[test]
fn predict_cli_overrides_replace_config_values() {
    let dir = tempfile::tempdir().unwrap();
    let calib = dir.path().join("calib.csv");
    let test = dir.path().join("test.csv");
    let output = dir.path().join("sets.csv");
    write_dataset(&calib, 60, true);
    write_dataset(&test, 6, false);
    let config = write_config(dir.path(), r#"{"alpha": [0.5]}"#);

    cmd()
        .arg("predict")
        .arg(&config)
        .arg("-c")
        .arg(&calib)
        .arg("-t")
        .arg(&test)
        .arg("-o")
        .arg(&output)
        .args(["--method", "lac", "--cv", "k_fold", "-a", "0.2", "--seed", "1"])
        .assert()
        .success();

    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.starts_with("row,y_pred,set_alpha_0.2\n"));
    assert_eq!(written.lines().count(), 7);
}
