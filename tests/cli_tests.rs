use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn deltaback() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_deltaback"));
    command.env("NO_COLOR", "1");
    command
}

#[test]
fn test_cli_run_history_and_show() {
    let source = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    fs::write(source.path().join("a.txt"), "alpha").unwrap();

    let run = |expect: &str| {
        let output = deltaback()
            .arg("run")
            .arg("-s")
            .arg(source.path())
            .arg("-d")
            .arg(dest.path())
            .output()
            .expect("Failed to run backup");
        assert!(output.status.success(), "CLI run failed: {:?}", output);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        assert!(stdout.contains(expect), "Unexpected run output: {}", stdout);
    };

    run("Baseline initialized");
    fs::write(source.path().join("b.txt"), "bravo").unwrap();
    run("Backup completed");

    let output = deltaback()
        .args(["history", "-d"])
        .arg(dest.path())
        .output()
        .expect("Failed to run history");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Completed"), "Unexpected history output: {}", stdout);
    assert!(stdout.contains("Initializing"), "Unexpected history output: {}", stdout);

    let output = deltaback()
        .args(["show", "-d"])
        .arg(dest.path())
        .arg("2")
        .output()
        .expect("Failed to run show");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("+ b.txt"), "Unexpected show output: {}", stdout);
}

#[test]
fn test_cli_missing_source_fails() {
    let dest = TempDir::new().unwrap();
    let output = deltaback()
        .arg("run")
        .arg("-s")
        .arg(dest.path().join("does-not-exist"))
        .arg("-d")
        .arg(dest.path())
        .output()
        .expect("Failed to run backup");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Source directory"), "Unexpected stderr: {}", stderr);
}

#[test]
fn test_cli_reads_json_config() {
    let source = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let config_dir = TempDir::new().unwrap();
    fs::write(source.path().join("keep.txt"), "keep").unwrap();
    fs::write(source.path().join("skip.tmp"), "skip").unwrap();

    let config_path = config_dir.path().join("backup.json");
    let config = serde_json::json!({
        "source_dir": source.path(),
        "destination_dir": dest.path(),
        "exclude_patterns": ["*.tmp"],
    });
    fs::write(&config_path, config.to_string()).unwrap();

    let output = deltaback()
        .arg("--config")
        .arg(&config_path)
        .arg("run")
        .output()
        .expect("Failed to run backup");
    assert!(output.status.success(), "CLI run failed: {:?}", output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Files: 1"), "Unexpected run output: {}", stdout);
}
