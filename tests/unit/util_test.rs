//! Tests for shared utilities

use prometheus_lane_scheduler::util::{init_tracing, now_ms, now_secs_f64};

#[test]
fn test_clock_helpers_agree() {
    let ms = now_ms();
    let secs = now_secs_f64();
    assert!(ms > 1_600_000_000_000);
    #[allow(clippy::cast_precision_loss)]
    let drift = (secs * 1000.0 - ms as f64).abs();
    assert!(drift < 5_000.0);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing("debug");
    init_tracing("info");
}
