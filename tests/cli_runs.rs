use std::fs;
use std::path::PathBuf;
use std::process::Command;

use serde_json::Value;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_dining_cli"))
}

fn config_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("dining_cli_{}_{}.json", std::process::id(), name));
    fs::write(&path, contents).expect("write config fixture");
    path
}

#[test]
fn run_reports_json() {
    let output = cli()
        .args([
            "run",
            "--seats",
            "3",
            "--duration-ms",
            "200",
            "--format",
            "json",
            "--monitor",
        ])
        .output()
        .expect("failed to run dining_cli run");
    assert!(
        output.status.success(),
        "CLI exited with {:?}",
        output.status.code()
    );

    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    let json: Value = serde_json::from_str(stdout.trim()).expect("run report JSON payload");
    assert_eq!(json["report"]["seats"], 3);
    assert_eq!(json["report"]["meals"].as_array().map(Vec::len), Some(3));
    assert!(json["report"]["max_meals"].as_u64().unwrap_or_default() > 0);
    assert_eq!(json["violations"].as_array().map(Vec::len), Some(0));
    assert!(json["events"]["total_events"].as_u64().unwrap_or_default() > 0);
    assert!(json.get("verdict").is_none());
}

#[test]
fn run_without_monitor_skips_instrumentation() {
    let output = cli()
        .args(["run", "--seats", "2", "--duration-ms", "100", "--format", "json"])
        .output()
        .expect("failed to run dining_cli run");
    assert!(output.status.success());

    let json: Value = serde_json::from_slice(&output.stdout).expect("run report JSON payload");
    assert!(json.get("violations").is_none());
    assert!(json.get("events").is_none());
    assert_eq!(json["report"]["seats"], 2);
}

#[test]
fn run_rejects_unrepresentable_duration() {
    let output = cli()
        .args(["run", "--seats", "3", "--duration-ms", "18446744073709551615"])
        .output()
        .expect("failed to run dining_cli run");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).expect("stderr UTF-8");
    assert!(stderr.contains("run_ms"), "unexpected stderr: {stderr}");
}

#[test]
fn run_rejects_single_seat() {
    let output = cli()
        .args(["run", "--seats", "1", "--duration-ms", "50"])
        .output()
        .expect("failed to run dining_cli run");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).expect("stderr UTF-8");
    assert!(stderr.contains("seats"), "unexpected stderr: {stderr}");
}

#[test]
fn scenarios_lists_every_variant() {
    let output = cli()
        .args(["scenarios", "--format", "json"])
        .output()
        .expect("failed to run dining_cli scenarios");
    assert!(output.status.success());

    let json: Value = serde_json::from_slice(&output.stdout).expect("scenario list JSON");
    let names: Vec<&str> = json
        .as_array()
        .expect("array of scenarios")
        .iter()
        .filter_map(|entry| entry["name"].as_str())
        .collect();
    assert_eq!(
        names,
        ["baseline", "traced", "single-slow", "weak-unfair", "strong-unfair"]
    );
}

#[test]
fn check_passes_baseline() {
    let output = cli()
        .args([
            "check",
            "--scenario",
            "baseline",
            "--seats",
            "3",
            "--duration-ms",
            "200",
            "--format",
            "json",
        ])
        .output()
        .expect("failed to run dining_cli check");
    assert_eq!(output.status.code(), Some(0));

    let json: Value = serde_json::from_slice(&output.stdout).expect("verdict JSON");
    assert_eq!(json["scenario"], "baseline");
    assert_eq!(json["verdict"]["passed"], true);
}

#[test]
fn check_exits_2_when_verdict_fails() {
    let config = config_file(
        "unreachable_floor",
        r#"{"table": {"seats": 5, "run_ms": 300, "join_grace_ms": 3000},
            "fairness": {"max_ratio": 1.5, "slow_meal_floor": 1000000000000}}"#,
    );
    let output = cli()
        .args(["check", "--scenario", "single-slow", "--config"])
        .arg(&config)
        .output()
        .expect("failed to run dining_cli check");
    let _ = fs::remove_file(&config);

    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    assert!(stdout.contains("verdict: FAIL"), "unexpected stdout: {stdout}");
}

#[test]
fn check_rejects_unknown_scenario() {
    let output = cli()
        .args(["check", "--scenario", "left-first"])
        .output()
        .expect("failed to run dining_cli check");
    assert!(!output.status.success());
}
