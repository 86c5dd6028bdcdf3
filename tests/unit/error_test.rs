//! Tests for error types

use prometheus_lane_scheduler::core::{ImplementError, SchedulerError};

#[test]
fn test_scheduler_error_display() {
    let err = SchedulerError::Validation("title must not be empty".into());
    assert_eq!(err.to_string(), "invalid job: title must not be empty");

    let err = SchedulerError::io(
        "/tmp/jobs.json",
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
    );
    assert!(err.to_string().contains("/tmp/jobs.json"));

    assert_eq!(SchedulerError::Cancelled.to_string(), "scheduler is shutting down");
}

#[test]
fn test_serde_error_converts() {
    let parse: Result<serde_json::Value, _> = serde_json::from_str("{");
    let err: SchedulerError = parse.unwrap_err().into();
    assert!(matches!(err, SchedulerError::Serialization(_)));
}

#[test]
fn test_implement_error_display_and_parse() {
    let err = ImplementError::from_message("  TypeError: unsupported operand  ");
    assert_eq!(err.error_type, "TypeError");
    assert_eq!(err.to_string(), "TypeError: unsupported operand");
    assert_eq!(ImplementError::from_message("").error_type, "UnknownError");
}
