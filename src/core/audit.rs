//! Job lifecycle audit trail.
//!
//! Provides the event model, an in-memory sink for tests and development, and
//! a forwarding impl so a sink can be shared with the scheduler while the
//! caller keeps a handle to inspect it.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::{Job, LaneKind};
use crate::util::clock::now_ms;

/// Lifecycle step recorded by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Admitted into a lane.
    Enqueued,
    /// Handed to a worker.
    Dispatched,
    /// Collaborator produced an artifact.
    Completed,
    /// Collaborator reported an error.
    Failed,
    /// Put back into its lane after a failure or timeout.
    Requeued,
    /// Pushed back because its base project was saturated.
    Deferred,
    /// Cancelled by the timeout supervisor.
    TimedOut,
    /// Replaced by escalation variants.
    Escalated,
    /// Removed for good without success.
    Dropped,
    /// Moved to a new priority after a backend recovery.
    Reprioritized,
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Action taken.
    pub action: AuditAction,
    /// Job title.
    pub title: String,
    /// Job-class, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_class: Option<String>,
    /// Lane involved, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<LaneKind>,
    /// Worker involved, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<usize>,
    /// Timestamp milliseconds.
    pub created_at_ms: u64,
    /// Additional context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEvent {
    /// Attach the lane.
    #[must_use]
    pub const fn in_lane(mut self, lane: LaneKind) -> Self {
        self.lane = Some(lane);
        self
    }

    /// Attach the worker.
    #[must_use]
    pub const fn on_worker(mut self, worker_id: usize) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    /// Attach free-form detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

impl<S: AuditSink + ?Sized> AuditSink for Arc<Mutex<S>> {
    fn record(&mut self, event: AuditEvent) {
        self.lock().record(event);
    }
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Create a sink already wrapped for sharing.
    #[must_use]
    pub fn shared(max_events: usize) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new(max_events)))
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// Titles of events with `action`, oldest first.
    pub fn titles(&self, action: AuditAction) -> Vec<String> {
        self.events
            .iter()
            .filter(|e| e.action == action)
            .map(|e| e.title.clone())
            .collect()
    }

    /// Number of events with `action`.
    pub fn count(&self, action: AuditAction) -> usize {
        self.events.iter().filter(|e| e.action == action).count()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Helper to build an audit event for `job`.
pub fn build_audit_event(action: AuditAction, job: &Job) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        action,
        title: job.title.clone(),
        job_class: Some(job.job_class.clone()),
        lane: None,
        worker_id: None,
        created_at_ms: now_ms(),
        detail: None,
    }
}

/// Helper to build an audit event when only the title is known.
pub fn build_title_event(action: AuditAction, title: impl Into<String>) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        action,
        title: title.into(),
        job_class: None,
        lane: None,
        worker_id: None,
        created_at_ms: now_ms(),
        detail: None,
    }
}
