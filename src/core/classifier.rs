//! Lane classification policy.

use std::collections::HashSet;

use crate::config::LanePolicyConfig;
use crate::core::{Job, LaneKind};

/// Decides which lane a job is routed to.
///
/// The scheduler only depends on this trait, so routing can be swapped
/// without touching the dispatch loop.
pub trait LaneClassifier: Send + Sync {
    /// Pick a lane for `job`.
    fn classify(&self, job: &Job) -> LaneKind;
}

/// Allow-list plus payload-size policy.
///
/// A job is fast only when its class is on the allow-list and its payload is
/// within the size threshold.
#[derive(Debug, Clone)]
pub struct ClassPolicy {
    fast_classes: HashSet<String>,
    max_fast_payload_bytes: usize,
}

impl ClassPolicy {
    /// Build a policy from explicit values.
    pub fn new<I, S>(fast_classes: I, max_fast_payload_bytes: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fast_classes: fast_classes
                .into_iter()
                .map(|c| c.as_ref().trim().to_lowercase())
                .collect(),
            max_fast_payload_bytes,
        }
    }

    /// Build a policy from configuration.
    #[must_use]
    pub fn from_config(cfg: &LanePolicyConfig) -> Self {
        Self::new(&cfg.fast_classes, cfg.max_fast_payload_bytes)
    }
}

impl LaneClassifier for ClassPolicy {
    fn classify(&self, job: &Job) -> LaneKind {
        if !self.fast_classes.contains(&job.job_class.to_lowercase()) {
            return LaneKind::Slow;
        }
        if job.payload_size() > self.max_fast_payload_bytes {
            return LaneKind::Slow;
        }
        LaneKind::Fast
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> ClassPolicy {
        ClassPolicy::from_config(&LanePolicyConfig::default())
    }

    #[test]
    fn test_allow_listed_class_is_fast() {
        let job = Job::new("a", "python", json!({"code": "print(1)"}));
        assert_eq!(policy().classify(&job), LaneKind::Fast);
        let job = Job::new("b", "JavaScript", json!(null));
        assert_eq!(policy().classify(&job), LaneKind::Fast);
    }

    #[test]
    fn test_other_classes_are_slow() {
        for class in ["rust", "c++", "go", "java"] {
            let job = Job::new("a", class, json!(null));
            assert_eq!(policy().classify(&job), LaneKind::Slow, "{class}");
        }
    }

    #[test]
    fn test_large_payload_is_slow() {
        let job = Job::new("a", "python", json!("x".repeat(2001)));
        assert_eq!(policy().classify(&job), LaneKind::Slow);
        let job = Job::new("a", "python", json!("x".repeat(2000)));
        assert_eq!(policy().classify(&job), LaneKind::Fast);
    }

    #[test]
    fn test_policy_is_reconfigurable() {
        let policy = ClassPolicy::new(["rust"], 10);
        assert_eq!(policy.classify(&Job::new("a", "rust", json!(null))), LaneKind::Fast);
        assert_eq!(policy.classify(&Job::new("a", "python", json!(null))), LaneKind::Slow);
    }
}
