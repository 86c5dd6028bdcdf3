//! Job descriptors and their lifecycle metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::SchedulerError;

/// Priority assigned to descriptors that omit one. Lower is more urgent.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Job-class assumed when a descriptor omits one.
pub const DEFAULT_JOB_CLASS: &str = "python";

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn default_job_class() -> String {
    DEFAULT_JOB_CLASS.to_string()
}

/// A unit of work as persisted in the job store.
///
/// `title` is the deduplication key. Everything in `payload` is opaque to the
/// scheduler and handed to the implementation collaborator untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique title, used as the dedup key.
    pub title: String,
    /// Opaque payload for the collaborator.
    #[serde(default)]
    pub payload: Value,
    /// Category tag driving lane selection and timeout lookup.
    #[serde(default = "default_job_class")]
    pub job_class: String,
    /// Dequeue priority, lower is more urgent.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Correlation key shared by retry variants of one task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_project_id: Option<String>,
    /// 0 for originals, 1..K for escalation tiers.
    #[serde(default)]
    pub escalation_level: u32,
    /// Number of failed or timed-out attempts so far.
    #[serde(default)]
    pub attempt_count: u32,
    /// Creation time in milliseconds since epoch.
    #[serde(default)]
    pub created_at_ms: u64,
    /// Last attempt time in milliseconds since epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_ms: Option<u64>,
    /// Text of the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Escalation details for retry variants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationContext>,
}

/// Context carried by a synthesized escalation variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationContext {
    /// Tier name (conservative, moderate, ...).
    pub tier: String,
    /// 1-based tier index.
    pub tier_index: u32,
    /// 1-based variation within the tier.
    pub variation: u32,
    /// Instruction text for the collaborator.
    pub instruction: String,
    /// Title of the job that failed.
    pub original_title: String,
    /// Failure classification of the originating job.
    pub error_type: String,
    /// Failure message of the originating job.
    pub error_message: String,
    /// Stable hash of the normalized failure.
    pub error_signature: String,
    /// Prior fixes found in the learning database.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub learned_fixes: Vec<String>,
    /// True when the variant replays a verified fix.
    #[serde(default)]
    pub proven_fix: bool,
}

impl Job {
    /// Create a job with default metadata.
    pub fn new(title: impl Into<String>, job_class: impl Into<String>, payload: Value) -> Self {
        Self {
            title: title.into(),
            payload,
            job_class: job_class.into(),
            priority: DEFAULT_PRIORITY,
            base_project_id: None,
            escalation_level: 0,
            attempt_count: 0,
            created_at_ms: crate::util::clock::now_ms(),
            last_attempt_ms: None,
            last_error: None,
            escalation: None,
        }
    }

    /// Set priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set base-project correlation key.
    #[must_use]
    pub fn with_base_project(mut self, base: impl Into<String>) -> Self {
        self.base_project_id = Some(base.into());
        self
    }

    /// Parse one persisted element, rejecting anything without a usable title.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Validation` for non-objects, missing or blank
    /// titles, and fields of the wrong type.
    pub fn from_value(value: Value) -> Result<Self, SchedulerError> {
        if !value.is_object() {
            return Err(SchedulerError::Validation(format!(
                "descriptor is not an object: {value}"
            )));
        }
        let mut job: Self = serde_json::from_value(value)
            .map_err(|e| SchedulerError::Validation(e.to_string()))?;
        job.validate()?;
        job.job_class = job.job_class.trim().to_lowercase();
        if job.job_class.is_empty() {
            job.job_class = default_job_class();
        }
        Ok(job)
    }

    /// Check invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Validation` when the title is blank.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.title.trim().is_empty() {
            return Err(SchedulerError::Validation("title must not be empty".into()));
        }
        Ok(())
    }

    /// Correlation key used by the throttle; falls back to the escalation
    /// origin for variants produced without an explicit base project.
    pub fn correlation_key(&self) -> Option<&str> {
        self.base_project_id.as_deref().or_else(|| {
            self.escalation
                .as_ref()
                .map(|e| e.original_title.as_str())
        })
    }

    /// Serialized payload length in bytes, used by the lane classifier.
    pub fn payload_size(&self) -> usize {
        match &self.payload {
            Value::Null => 0,
            Value::String(s) => s.len(),
            other => serde_json::to_string(other).map_or(0, |s| s.len()),
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self, error: impl Into<String>, now_ms: u64) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_ms = Some(now_ms);
        self.last_error = Some(error.into());
    }
}

/// Terminal or intermediate outcome of one job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Collaborator produced an artifact.
    Completed {
        /// Where the artifact was written.
        artifact: String,
    },
    /// Collaborator reported a failure.
    Failed {
        /// Failure classification.
        error_type: String,
        /// Failure text.
        message: String,
    },
    /// Run was cancelled by the timeout supervisor.
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_applied_on_parse() {
        let job = Job::from_value(json!({"title": "todo app"})).unwrap();
        assert_eq!(job.priority, DEFAULT_PRIORITY);
        assert_eq!(job.job_class, "python");
        assert_eq!(job.escalation_level, 0);
        assert_eq!(job.attempt_count, 0);
        assert!(job.base_project_id.is_none());
    }

    #[test]
    fn test_job_class_is_normalized() {
        let job = Job::from_value(json!({"title": "t", "job_class": " Rust "})).unwrap();
        assert_eq!(job.job_class, "rust");
    }

    #[test]
    fn test_rejects_blank_title() {
        assert!(Job::from_value(json!({"title": "  "})).is_err());
        assert!(Job::from_value(json!({"payload": {}})).is_err());
        assert!(Job::from_value(json!("just a string")).is_err());
        assert!(Job::from_value(json!({"title": "x", "priority": "high"})).is_err());
    }

    #[test]
    fn test_payload_size() {
        let job = Job::new("a", "python", json!("abcd"));
        assert_eq!(job.payload_size(), 4);
        let job = Job::new("a", "python", Value::Null);
        assert_eq!(job.payload_size(), 0);
        let job = Job::new("a", "python", json!({"k": 1}));
        assert_eq!(job.payload_size(), r#"{"k":1}"#.len());
    }

    #[test]
    fn test_correlation_key_prefers_base_project() {
        let job = Job::new("a", "python", Value::Null).with_base_project("base");
        assert_eq!(job.correlation_key(), Some("base"));
        let job = Job::new("a", "python", Value::Null);
        assert_eq!(job.correlation_key(), None);
    }

    #[test]
    fn test_record_failure_increments() {
        let mut job = Job::new("a", "python", Value::Null);
        job.record_failure("boom", 42);
        job.record_failure("boom again", 43);
        assert_eq!(job.attempt_count, 2);
        assert_eq!(job.last_attempt_ms, Some(43));
        assert_eq!(job.last_error.as_deref(), Some("boom again"));
    }
}
