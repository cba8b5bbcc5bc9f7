//! End-to-end runs of the `sandstorm` binary against the simulated provider

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn sandstorm(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sandstorm"))
        .args(args)
        .env("SANDSTORM_TEMPLATE", "mobile-v1")
        .env("SANDSTORM_SETTLE_DELAY_MS", "0")
        .env("SANDSTORM_RETRY_DELAY_MS", "1")
        .env_remove("SANDSTORM_PROVIDER")
        .env_remove("SANDSTORM_UNIT_COUNT")
        .env_remove("SANDSTORM_PROCESS_COUNT")
        .output()
        .expect("failed to run sandstorm")
}

fn only_task_dir(output_root: &Path) -> PathBuf {
    let dirs: Vec<PathBuf> = std::fs::read_dir(output_root)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.is_dir())
        .collect();
    assert_eq!(dirs.len(), 1, "expected one task directory, found {:?}", dirs);
    dirs.into_iter().next().unwrap()
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_fan_out_batch_writes_merged_results() {
    let out = tempfile::tempdir().unwrap();
    let output = sandstorm(&[
        "batch",
        "--simulate",
        "--units",
        "5",
        "--processes",
        "2",
        "--use-pre-mounted-assets",
        "--output-dir",
        out.path().to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let task_dir = only_task_dir(out.path());
    let name = task_dir.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("5_p2_"), "{}", name);

    for file in ["summary.json", "details.json", "workers.json"] {
        assert!(task_dir.join(file).exists(), "missing {}", file);
    }
    assert!(task_dir.join("worker_00").join("summary.json").exists());
    assert!(task_dir.join("worker_01").join("summary.json").exists());

    let summary = read_json(&task_dir.join("summary.json"));
    assert_eq!(summary["summary"]["total_sandboxes"], 5);
    assert_eq!(summary["summary"]["successful_sandboxes"], 5);
    assert_eq!(summary["config"]["process_count"], 2);

    let details = read_json(&task_dir.join("details.json"));
    assert_eq!(details["records"].as_array().unwrap().len(), 5);
}

#[test]
fn test_single_process_batch_prints_report() {
    let out = tempfile::tempdir().unwrap();
    let output = sandstorm(&[
        "batch",
        "--simulate",
        "--units",
        "2",
        "--processes",
        "1",
        "--use-pre-mounted-assets",
        "--output-dir",
        out.path().to_str().unwrap(),
    ]);
    assert!(output.status.success());

    let task_dir = only_task_dir(out.path());
    let summary = read_json(&task_dir.join("summary.json"));
    assert_eq!(summary["summary"]["total_sandboxes"], 2);
    assert!(!task_dir.join("workers.json").exists());
}

#[test]
fn test_invalid_configuration_exits_non_zero() {
    let out = tempfile::tempdir().unwrap();
    let output = sandstorm(&[
        "batch",
        "--simulate",
        "--units",
        "0",
        "--output-dir",
        out.path().to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Configuration error"));
}

#[test]
fn test_drive_lists_actions() {
    let output = sandstorm(&["drive", "--list-actions"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("set_screen_resolution"));
    assert!(stdout.contains("get_device_logs"));
}
