//! Tests for audit events and sinks

use prometheus_lane_scheduler::core::{
    build_audit_event, build_title_event, AuditAction, AuditSink, InMemoryAuditSink, Job, LaneKind,
};
use prometheus_lane_scheduler::infra::JsonlAuditSink;

#[test]
fn test_event_builders() {
    let job = Job::new("demo", "go", serde_json::Value::Null);
    let event = build_audit_event(AuditAction::Dispatched, &job)
        .in_lane(LaneKind::Slow)
        .on_worker(3)
        .with_detail("attempt 1");
    assert_eq!(event.title, "demo");
    assert_eq!(event.job_class.as_deref(), Some("go"));
    assert_eq!(event.lane, Some(LaneKind::Slow));
    assert_eq!(event.worker_id, Some(3));
    assert!(!event.event_id.is_empty());

    let other = build_title_event(AuditAction::Dispatched, "demo");
    assert_ne!(other.event_id, event.event_id);
    assert_eq!(other.job_class, None);
}

#[test]
fn test_action_serializes_snake_case() {
    let event = build_title_event(AuditAction::TimedOut, "slow one");
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["action"], "timed_out");
    assert!(json.get("lane").is_none());
}

#[test]
fn test_zero_capacity_sink_keeps_nothing() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(build_title_event(AuditAction::Enqueued, "x"));
    assert!(sink.events().is_empty());
}

#[test]
fn test_jsonl_sink_appends_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    {
        let mut sink = JsonlAuditSink::open(&path).unwrap();
        sink.record(build_title_event(AuditAction::Enqueued, "a"));
    }
    {
        let mut sink = JsonlAuditSink::open(&path).unwrap();
        sink.record(build_title_event(AuditAction::Completed, "a"));
    }
    let events = JsonlAuditSink::read_all(&path).unwrap();
    let actions: Vec<_> = events.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Enqueued, AuditAction::Completed]);
}
