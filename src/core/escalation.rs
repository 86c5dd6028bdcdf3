//! Escalation engine.
//!
//! Once a job has failed `threshold` times it is replaced by a bounded set of
//! retry variants, one group per aggressiveness tier. Variants carry the
//! original payload plus the tier instruction and any fixes the learning
//! database already knows for the same failure. A verified fix for the exact
//! signature and class short-circuits to a single variant.

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::config::EscalationConfig;
use crate::core::{EscalationContext, ImplementError, Job, SchedulerError};
use crate::infra::learning_db::{FixRecord, FixSuccess, LearningDb};

const SIGNATURE_HEX_LEN: usize = 16;

/// Classified failure of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSignature {
    /// Failure classification.
    pub error_type: String,
    /// Raw failure text.
    pub message: String,
    /// Stable hash of type plus normalized message.
    pub signature: String,
}

/// What to do with a job that reached the failure threshold.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationPlan {
    /// Replace the job with these variants.
    Variants(Vec<Job>),
    /// The job is at the maximum level and must be dropped.
    Exhausted,
}

/// Strips run-specific detail from error messages so that equivalent failures
/// hash to the same signature.
#[derive(Debug, Clone)]
pub struct SignatureNormalizer {
    line_numbers: Regex,
    paths: Regex,
    quoted: Regex,
}

impl SignatureNormalizer {
    /// Compile the normalization patterns.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Config` if a pattern fails to compile.
    pub fn new() -> Result<Self, SchedulerError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| SchedulerError::Config(format!("bad pattern: {e}")))
        };
        Ok(Self {
            line_numbers: compile(r"line \d+")?,
            paths: compile(r"/[^\s]+")?,
            quoted: compile(r#"["'].*?["']"#)?,
        })
    }

    /// Lowercase and replace line numbers, paths and quoted literals.
    pub fn normalize(&self, message: &str) -> String {
        let lowered = message.to_lowercase();
        let s = self.line_numbers.replace_all(&lowered, "line X");
        let s = self.paths.replace_all(&s, "/path");
        self.quoted.replace_all(&s, "STRING").into_owned()
    }

    /// Signature for a failure: truncated SHA-256 of `type:normalized`.
    pub fn signature(&self, error_type: &str, message: &str) -> String {
        let normalized = self.normalize(message);
        let digest = Sha256::digest(format!("{error_type}:{normalized}").as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(SIGNATURE_HEX_LEN);
        hex
    }

    /// Classify a collaborator error.
    pub fn classify(&self, error: &ImplementError) -> FailureSignature {
        FailureSignature {
            error_type: error.error_type.clone(),
            message: error.message.clone(),
            signature: self.signature(&error.error_type, &error.message),
        }
    }
}

/// Generates escalation variants and feeds outcomes back to the learning
/// database.
#[derive(Debug, Clone)]
pub struct EscalationEngine {
    cfg: EscalationConfig,
    normalizer: SignatureNormalizer,
    db: LearningDb,
}

impl EscalationEngine {
    /// Build an engine.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Config` if the configuration is invalid.
    pub fn new(cfg: EscalationConfig, db: LearningDb) -> Result<Self, SchedulerError> {
        cfg.validate().map_err(SchedulerError::Config)?;
        Ok(Self {
            cfg,
            normalizer: SignatureNormalizer::new()?,
            db,
        })
    }

    /// Active configuration.
    pub const fn config(&self) -> &EscalationConfig {
        &self.cfg
    }

    /// Learning database handle.
    pub const fn learning_db(&self) -> &LearningDb {
        &self.db
    }

    /// Signature helper.
    pub const fn normalizer(&self) -> &SignatureNormalizer {
        &self.normalizer
    }

    /// True once the job's failures reached the threshold.
    #[must_use]
    pub const fn should_escalate(&self, job: &Job) -> bool {
        job.attempt_count >= self.cfg.threshold
    }

    /// Decide how to escalate `job` after `error`.
    ///
    /// A learning-database read failure is logged and treated as "no prior
    /// fixes"; escalation itself never fails on it.
    pub fn plan(&self, job: &Job, error: &ImplementError) -> EscalationPlan {
        if job.escalation_level >= self.cfg.max_level {
            return EscalationPlan::Exhausted;
        }
        let failure = self.normalizer.classify(error);
        // A replayed fix that failed again gets the full tier set.
        let replayed = job.escalation.as_ref().is_some_and(|ctx| ctx.proven_fix);
        if self.cfg.short_circuit_known_fix && !replayed {
            match self.db.find_verified(&failure.signature, &job.job_class) {
                Ok(Some(record)) => {
                    return EscalationPlan::Variants(vec![self.proven_variant(job, &failure, &record)]);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "learning db lookup failed"),
            }
        }
        let learned = self
            .db
            .similar_fixes(
                &failure.signature,
                &job.job_class,
                &failure.error_type,
                self.cfg.max_learned_fixes,
            )
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "learning db lookup failed");
                Vec::new()
            })
            .into_iter()
            .map(|r| r.fix)
            .collect::<Vec<_>>();
        EscalationPlan::Variants(self.tier_variants(job, &failure, &learned))
    }

    /// One group of variants per tier, `variations_per_tier` each. Priority is
    /// `base_priority + tier index`, so urgency never increases across tiers.
    pub fn tier_variants(&self, job: &Job, failure: &FailureSignature, learned: &[String]) -> Vec<Job> {
        let level = job.escalation_level + 1;
        let origin = origin_title(job);
        let mut variants = Vec::new();
        for (tier_idx, tier) in (0_u32..).zip(&self.cfg.tiers) {
            for variation in 1..=self.cfg.variations_per_tier {
                let title = format!("{origin} - escalation L{level} {} v{variation}", tier.name);
                let context = EscalationContext {
                    tier: tier.name.clone(),
                    tier_index: tier_idx + 1,
                    variation,
                    instruction: tier.instruction.clone(),
                    original_title: job.title.clone(),
                    error_type: failure.error_type.clone(),
                    error_message: failure.message.clone(),
                    error_signature: failure.signature.clone(),
                    learned_fixes: learned.to_vec(),
                    proven_fix: false,
                };
                let priority = self
                    .cfg
                    .base_priority
                    .saturating_add(i32::try_from(tier_idx).unwrap_or(i32::MAX));
                variants.push(variant_of(job, title, priority, level, context));
            }
        }
        variants
    }

    fn proven_variant(&self, job: &Job, failure: &FailureSignature, record: &FixRecord) -> Job {
        let level = job.escalation_level + 1;
        let origin = origin_title(job);
        let (tier, instruction) = self
            .cfg
            .tiers
            .first()
            .map(|t| (t.name.clone(), t.instruction.clone()))
            .unwrap_or_default();
        let context = EscalationContext {
            tier,
            tier_index: 1,
            variation: 1,
            instruction,
            original_title: job.title.clone(),
            error_type: failure.error_type.clone(),
            error_message: failure.message.clone(),
            error_signature: failure.signature.clone(),
            learned_fixes: vec![record.fix.clone()],
            proven_fix: true,
        };
        let title = format!("{origin} - escalation L{level} proven-fix");
        variant_of(job, title, self.cfg.base_priority, level, context)
    }

    /// Feed a successful escalated job back into the learning database.
    /// Jobs without escalation context are ignored.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` or `SchedulerError::Serialization` if the
    /// database cannot be rewritten.
    pub fn record_success(&self, job: &Job, artifact: &str) -> Result<Option<FixRecord>, SchedulerError> {
        let Some(ctx) = &job.escalation else {
            return Ok(None);
        };
        let fix = if ctx.proven_fix {
            ctx.learned_fixes.first().cloned().unwrap_or_default()
        } else {
            format!("[{}] {}\nartifact: {artifact}", ctx.tier, ctx.instruction)
        };
        let record = self.db.record_success(FixSuccess {
            error_signature: ctx.error_signature.clone(),
            job_class: job.job_class.clone(),
            error_type: ctx.error_type.clone(),
            error_message: ctx.error_message.clone(),
            fix,
            project: origin_title(job),
        })?;
        Ok(Some(record))
    }

    /// Count a failed run of a variant that replayed a proven fix.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` or `SchedulerError::Serialization` if the
    /// database cannot be rewritten.
    pub fn record_proven_fix_failure(&self, job: &Job) -> Result<bool, SchedulerError> {
        match &job.escalation {
            Some(ctx) if ctx.proven_fix => self.db.record_attempt(&ctx.error_signature, &job.job_class),
            _ => Ok(false),
        }
    }
}

/// Root title of a job family: the base-project id, falling back to the title.
fn origin_title(job: &Job) -> String {
    job.base_project_id.clone().unwrap_or_else(|| job.title.clone())
}

fn variant_of(job: &Job, title: String, priority: i32, level: u32, context: EscalationContext) -> Job {
    let mut variant = Job::new(title, job.job_class.clone(), job.payload.clone())
        .with_priority(priority)
        .with_base_project(origin_title(job));
    variant.escalation_level = level;
    variant.last_error = job.last_error.clone();
    variant.escalation = Some(context);
    variant
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine(dir: &std::path::Path) -> EscalationEngine {
        EscalationEngine::new(
            EscalationConfig::default(),
            LearningDb::new(dir.join("fixes.json")),
        )
        .unwrap()
    }

    fn failing_job() -> Job {
        let mut job = Job::new("todo cli", "python", json!({"idea": "todo"}));
        for _ in 0..4 {
            job.record_failure("NameError: name 'x' is not defined", 1);
        }
        job
    }

    #[test]
    fn test_normalize() {
        let n = SignatureNormalizer::new().unwrap();
        let out = n.normalize("Error in /tmp/a/main.py at Line 42: name 'foo' missing");
        assert_eq!(out, "error in /path at line X: name STRING missing");
    }

    #[test]
    fn test_signature_ignores_run_detail() {
        let n = SignatureNormalizer::new().unwrap();
        let a = n.signature("NameError", "name 'x' is not defined at line 3 in /tmp/run1/app.py");
        let b = n.signature("NameError", "name 'y' is not defined at line 90 in /tmp/run2/app.py");
        let c = n.signature("TypeError", "name 'x' is not defined at line 3 in /tmp/run1/app.py");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_variants_shape() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let job = failing_job();
        assert!(engine.should_escalate(&job));

        let err = ImplementError::from_message("NameError: name 'x' is not defined");
        let EscalationPlan::Variants(variants) = engine.plan(&job, &err) else {
            panic!("expected variants");
        };
        assert_eq!(variants.len(), 8);
        assert!(variants.iter().all(|v| v.escalation_level == 1));
        assert!(variants.iter().all(|v| v.attempt_count == 0));
        assert!(variants.iter().all(|v| v.base_project_id.as_deref() == Some("todo cli")));
        assert!(variants.windows(2).all(|w| w[0].priority <= w[1].priority));
        let mut titles: Vec<_> = variants.iter().map(|v| v.title.clone()).collect();
        titles.sort();
        titles.dedup();
        assert_eq!(titles.len(), 8);
    }

    #[test]
    fn test_max_level_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let mut job = failing_job();
        job.escalation_level = engine.config().max_level;
        let err = ImplementError::new("NameError", "x");
        assert_eq!(engine.plan(&job, &err), EscalationPlan::Exhausted);
    }

    #[test]
    fn test_success_feeds_learning_db_and_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let job = failing_job();
        let err = ImplementError::from_message("NameError: name 'x' is not defined");

        let EscalationPlan::Variants(variants) = engine.plan(&job, &err) else {
            panic!("expected variants");
        };
        let record = engine.record_success(&variants[0], "out/todo").unwrap().unwrap();
        assert!(record.verified);

        let EscalationPlan::Variants(again) = engine.plan(&job, &err) else {
            panic!("expected variants");
        };
        assert_eq!(again.len(), 1);
        let ctx = again[0].escalation.as_ref().unwrap();
        assert!(ctx.proven_fix);
        assert_eq!(ctx.learned_fixes, vec![record.fix]);

        assert!(engine.record_proven_fix_failure(&again[0]).unwrap());
    }

    #[test]
    fn test_failed_proven_fix_escalates_into_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let job = failing_job();
        let err = ImplementError::from_message("NameError: name 'x' is not defined");

        let EscalationPlan::Variants(variants) = engine.plan(&job, &err) else {
            panic!("expected variants");
        };
        let record = engine.record_success(&variants[0], "out/todo").unwrap().unwrap();
        let EscalationPlan::Variants(proven) = engine.plan(&job, &err) else {
            panic!("expected variants");
        };
        let mut replay = proven[0].clone();
        for _ in 0..4 {
            replay.record_failure("NameError: name 'x' is not defined", 2);
        }
        assert!(engine.record_proven_fix_failure(&replay).unwrap());

        let EscalationPlan::Variants(next) = engine.plan(&replay, &err) else {
            panic!("expected variants");
        };
        assert_eq!(next.len(), 8);
        assert!(next.iter().all(|v| v.escalation_level == 2));
        assert!(next.iter().all(|v| !v.escalation.as_ref().unwrap().proven_fix));
        assert!(next.iter().all(|v| v.title.starts_with("todo cli - escalation L2 ")));
        assert!(next[0].escalation.as_ref().unwrap().learned_fixes.contains(&record.fix));
    }

    #[test]
    fn test_plain_jobs_do_not_touch_learning_db() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let job = Job::new("plain", "python", json!(null));
        assert!(engine.record_success(&job, "out").unwrap().is_none());
        assert!(!engine.record_proven_fix_failure(&job).unwrap());
    }
}
