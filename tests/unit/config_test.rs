//! Tests for configuration parsing and validation

use std::collections::HashMap;
use std::time::Duration;

use prometheus_lane_scheduler::config::{SchedulerConfig, TierConfig};

#[test]
fn test_default_config_validation() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.worker_count, 10);
    assert_eq!(cfg.escalation.threshold, 4);
    assert_eq!(cfg.escalation.tiers.len(), 4);
    assert_eq!(cfg.intervals.stuck_threshold_ms, 120_000);
}

#[test]
fn test_partial_json_fills_defaults() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{
            "worker_count": 4,
            "timeouts": {"per_class_secs": {"python": 30}},
            "throttle": {"max_per_base_project": 2}
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.worker_count, 4);
    assert_eq!(cfg.throttle.max_per_base_project, 2);
    assert_eq!(cfg.timeout_for("python"), Duration::from_secs(30));
    // Replaced map: classes it omits fall back to the default budget.
    assert_eq!(cfg.timeout_for("rust"), Duration::from_secs(20 * 60));
    assert_eq!(cfg.health.backends.len(), 2);
}

#[test]
fn test_timeout_lookup_is_case_insensitive() {
    let cfg = SchedulerConfig::default();
    assert_eq!(cfg.timeout_for("Rust"), Duration::from_secs(7200));
    assert_eq!(cfg.timeout_for("PYTHON"), Duration::from_secs(600));
    assert_eq!(cfg.timeout_for("cobol"), Duration::from_secs(1200));
}

#[test]
fn test_invalid_configs_rejected() {
    let mut cfg = SchedulerConfig::default();
    cfg.worker_count = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = SchedulerConfig::default();
    cfg.health.primary = "missing".into();
    assert!(cfg.validate().unwrap_err().contains("missing"));

    let mut cfg = SchedulerConfig::default();
    cfg.lanes.slow_lane_variants.push("ghost".into());
    assert!(cfg.validate().unwrap_err().contains("ghost"));

    let mut cfg = SchedulerConfig::default();
    cfg.escalation.tiers.clear();
    assert!(cfg.validate().is_err());

    let mut cfg = SchedulerConfig::default();
    cfg.intervals.change_poll_ms = 0;
    assert!(cfg.validate().is_err());

    assert!(SchedulerConfig::from_json_str("{ nope").is_err());
}

#[test]
fn test_custom_tiers_round_trip_through_json() {
    let mut cfg = SchedulerConfig::default();
    cfg.escalation.tiers = vec![TierConfig {
        name: "gentle".into(),
        instruction: "small steps".into(),
    }];
    let json = serde_json::to_string(&cfg).unwrap();
    let back = SchedulerConfig::from_json_str(&json).unwrap();
    assert_eq!(back.escalation.tiers, cfg.escalation.tiers);
}

#[test]
fn test_env_lookup_overrides_paths() {
    let vars: HashMap<&str, &str> = [
        ("LANE_SCHEDULER_WORKERS", "3"),
        ("LANE_SCHEDULER_STORE", "/tmp/lanes/jobs.json"),
        ("LANE_SCHEDULER_INBOX", ""),
    ]
    .into_iter()
    .collect();
    let mut cfg = SchedulerConfig::default();
    cfg.apply_env_with(|k| vars.get(k).map(|v| (*v).to_string()))
        .unwrap();
    assert_eq!(cfg.worker_count, 3);
    assert_eq!(cfg.paths.job_store.to_str(), Some("/tmp/lanes/jobs.json"));
    assert!(cfg.paths.inbox_dir.is_none());
}
