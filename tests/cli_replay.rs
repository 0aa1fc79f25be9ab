//! CLI contract tests for `ste replay` and `ste config`.

mod common;

use std::fs;

use serde_json::Value;

fn node(id: u64, jitter: bool, heartbeat: Option<i64>) -> Value {
    let trend = if jitter {
        serde_json::json!({"cause_rate": 1.0, "result_rate": -1.0, "cause_value": 5.0, "result_value": 10.0})
    } else {
        serde_json::json!({"cause_rate": 0.0, "result_rate": 0.0, "cause_value": 1.0, "result_value": 50.0})
    };
    let mut value = serde_json::json!({"id": id, "slow_trend": trend});
    if let Some(offset) = heartbeat {
        value["heartbeat_offset_secs"] = Value::from(offset);
    }
    value
}

fn scenario() -> Value {
    let stale: Vec<Value> = (1..=5).map(|id| node(id, id == 1, Some(0))).collect();
    let fresh: Vec<Value> = (1..=5).map(|id| node(id, id == 1, None)).collect();
    serde_json::json!({
        "start": "2024-05-01T12:00:00Z",
        "regions": [
            {"region_id": 1, "leader": 1},
            {"region_id": 2, "leader": 1},
            {"region_id": 3, "leader": 1},
            {"region_id": 4, "leader": 1}
        ],
        "ticks": [
            {"offset_secs": 10, "nodes": stale},
            {"offset_secs": 40, "nodes": fresh}
        ]
    })
}

#[test]
fn replay_prints_one_json_line_per_tick() {
    let dir = tempfile::tempdir().expect("temp dir");
    let scenario_path = dir.path().join("scenario.json");
    let state_path = dir.path().join("state").join("schedulers.json");
    let config_path = dir.path().join("config.toml");
    fs::write(&scenario_path, scenario().to_string()).expect("write scenario");
    fs::write(&config_path, "[scheduler]\nevict_leader_batch_size = 2\n").expect("write config");

    let result = common::run_cli_case(
        "replay_prints_one_json_line_per_tick",
        &[
            "replay",
            "--config",
            config_path.to_str().expect("utf8 path"),
            "--scenario",
            scenario_path.to_str().expect("utf8 path"),
            "--state",
            state_path.to_str().expect("utf8 path"),
        ],
    );
    assert!(
        result.status.success(),
        "replay should succeed; log: {}",
        result.log_path.display()
    );

    let lines: Vec<Value> = result
        .stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(lines.len(), 2, "log: {}", result.log_path.display());
    assert_eq!(lines[0]["outcome"]["plan"]["action"]["kind"], "none");
    assert_eq!(lines[1]["outcome"]["plan"]["action"]["kind"], "start_eviction");
    assert_eq!(lines[1]["outcome"]["plan"]["action"]["node"], 1);
    assert_eq!(
        lines[1]["outcome"]["operators"]
            .as_array()
            .map(Vec::len),
        Some(2)
    );

    let stored = fs::read_to_string(&state_path).expect("state file written");
    assert!(stored.contains("evict-slow-trend-scheduler"));
    assert!(stored.contains(r#"{\"evict-by-trend-stores\":[1]}"#));
}

#[test]
fn replay_with_missing_scenario_fails() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config_path = dir.path().join("config.toml");
    fs::write(&config_path, "").expect("write config");
    let missing = dir.path().join("absent.json");
    let result = common::run_cli_case(
        "replay_with_missing_scenario_fails",
        &[
            "replay",
            "--config",
            config_path.to_str().expect("utf8 path"),
            "--scenario",
            missing.to_str().expect("utf8 path"),
        ],
    );
    assert_eq!(result.status.code(), Some(2), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("STE-3002"));
}

#[test]
fn config_prints_toml_with_hash() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config_path = dir.path().join("config.toml");
    fs::write(&config_path, "[cluster]\nstorage_engine = \"raft-kv2\"\n").expect("write config");
    let result = common::run_cli_case(
        "config_prints_toml_with_hash",
        &["config", "--config", config_path.to_str().expect("utf8 path")],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("# hash: "));
    assert!(result.stdout.contains("storage_engine = \"raft-kv2\""));
    assert!(result.stdout.contains("recovery_duration_gap_secs = 600"));
}

#[test]
fn invalid_config_exits_with_user_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config_path = dir.path().join("config.toml");
    fs::write(&config_path, "[cluster]\naffected_store_ratio_threshold = 1.5\n")
        .expect("write config");
    let result = common::run_cli_case(
        "invalid_config_exits_with_user_error",
        &["config", "--config", config_path.to_str().expect("utf8 path")],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("STE-1001"));
}
