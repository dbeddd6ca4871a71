//! Integration tests for the CLI application
//!
//! These tests run the built binary against model and CSV files in a
//! temporary directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::{NamedTempFile, TempDir};

/// Training and testing CSV files for a two-class problem
struct TestDataFiles {
    pub train_csv: NamedTempFile,
    pub test_csv: NamedTempFile,
}

impl TestDataFiles {
    fn new() -> std::io::Result<Self> {
        let mut train_csv = NamedTempFile::with_suffix(".csv")?;
        writeln!(train_csv, "Path,Index,Answer,f0,f1")?;
        for i in 0..6 {
            let d = i as f64 * 0.1;
            writeln!(train_csv, "cat{i}.png,{i},Cat,{},{}", 2.0 + d, 1.0 + d)?;
            writeln!(train_csv, "bg{i}.png,{i},None,{},{}", -2.0 - d, -1.0 - d)?;
        }
        train_csv.flush()?;

        let mut test_csv = NamedTempFile::with_suffix(".csv")?;
        writeln!(test_csv, "Path,Index,Answer,f0,f1")?;
        writeln!(test_csv, "cat.png,0,Cat,1.6,0.7")?;
        writeln!(test_csv, "bg.png,0,None,-1.6,-0.7")?;
        test_csv.flush()?;

        Ok(TestDataFiles {
            train_csv,
            test_csv,
        })
    }
}

fn rclass() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rclass"))
}

fn run_ok(cmd: &mut Command) -> Output {
    let output = cmd.output().expect("Failed to execute rclass");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn init_svm(model: &Path) {
    run_ok(
        rclass()
            .args(["init", "--model"])
            .arg(model)
            .args(["--classifier", "svm", "-C", "1.0", "--features", "2"]),
    );
}

fn model_path(dir: &TempDir) -> PathBuf {
    dir.path().join("model.json")
}

#[test]
fn test_cli_help() {
    let output = run_ok(rclass().arg("--help"));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("init"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("info"));
}

#[test]
fn test_init_creates_model() {
    let dir = TempDir::new().unwrap();
    let model = model_path(&dir);

    let output = run_ok(
        rclass()
            .args(["init", "--model"])
            .arg(&model)
            .args(["--classifier", "nn", "--hidden", "6,4", "--seed", "3"]),
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Created"));

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&model).unwrap()).unwrap();
    assert_eq!(json["config"]["classifier"]["kind"], "neural_network");
    assert_eq!(json["config"]["classifier"]["hidden_layers"], serde_json::json!([6, 4]));
    assert_eq!(json["config"]["seed"], 3);
    assert!(json["classifier"].is_null());
}

#[test]
fn test_init_rejects_invalid_cutoff() {
    let dir = TempDir::new().unwrap();
    let output = rclass()
        .args(["init", "--model"])
        .arg(model_path(&dir))
        .args(["--unknown-cutoff", "1.5"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
    assert!(!model_path(&dir).exists());
}

#[test]
fn test_run_train_and_test() {
    let data = TestDataFiles::new().unwrap();
    let dir = TempDir::new().unwrap();
    let model = model_path(&dir);
    init_svm(&model);

    let output = run_ok(
        rclass()
            .args(["run", "--model"])
            .arg(&model)
            .arg(data.train_csv.path())
            .arg(data.test_csv.path()),
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Training agreement: 100.00% (12 examples)"));
    assert!(stdout.contains("Testing agreement: 100.00% (2 examples)"));

    let info = run_ok(rclass().args(["info", "--model"]).arg(&model));
    assert!(!String::from_utf8_lossy(&info.stdout).is_empty());
}

#[test]
fn test_run_in_place_adds_columns() {
    let data = TestDataFiles::new().unwrap();
    let dir = TempDir::new().unwrap();
    let model = model_path(&dir);
    init_svm(&model);

    run_ok(
        rclass()
            .args(["run", "--in-place", "--model"])
            .arg(&model)
            .arg(data.train_csv.path())
            .arg(data.test_csv.path()),
    );

    let text = fs::read_to_string(data.test_csv.path()).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("Path,Index,Answer,Prediction,Probability,f0,f1"));
    assert!(lines.next().unwrap().starts_with("cat.png,0,Cat,Cat,"));
    assert!(lines.next().unwrap().starts_with("bg.png,0,None,None,"));
}

#[test]
fn test_run_test_only_on_untrained_model_fails() {
    let data = TestDataFiles::new().unwrap();
    let dir = TempDir::new().unwrap();
    let model = model_path(&dir);
    init_svm(&model);
    let before = fs::read_to_string(&model).unwrap();

    let output = rclass()
        .args(["run", "--test-only", "--model"])
        .arg(&model)
        .arg(data.test_csv.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
    assert_eq!(fs::read_to_string(&model).unwrap(), before);
}

#[test]
fn test_run_missing_model_fails() {
    let data = TestDataFiles::new().unwrap();
    let dir = TempDir::new().unwrap();

    let output = rclass()
        .args(["run", "--model"])
        .arg(model_path(&dir))
        .arg(data.train_csv.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("does not exist"));
}

#[test]
fn test_info_garbage_model_fails() {
    let mut garbage = NamedTempFile::new().unwrap();
    writeln!(garbage, "not a model").unwrap();

    let output = rclass()
        .args(["info", "--model"])
        .arg(garbage.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
}
