//! Scheduler configuration structures.
//!
//! Every section defaults to the values the scheduler ships with, so a config
//! file only needs the keys it wants to change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// File locations used by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Persisted JSON array of job descriptors.
    pub job_store: PathBuf,
    /// Learning database of verified fixes.
    pub learning_db: PathBuf,
    /// Periodically rewritten status snapshot.
    pub status_file: PathBuf,
    /// Optional drop-box directory for `*.json` job files.
    pub inbox_dir: Option<PathBuf>,
    /// Optional JSON-lines lifecycle log.
    pub audit_log: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            job_store: PathBuf::from("jobs.json"),
            learning_db: PathBuf::from("fix_database.json"),
            status_file: PathBuf::from("scheduler_status.json"),
            inbox_dir: Some(PathBuf::from("inbox")),
            audit_log: None,
        }
    }
}

/// Lane classification policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanePolicyConfig {
    /// Job-classes whose test harness is cheap enough for the fast lane.
    pub fast_classes: Vec<String>,
    /// Payloads larger than this many bytes go to the slow lane.
    pub max_fast_payload_bytes: usize,
    /// Backends tried in order for every slow-lane job.
    pub slow_lane_variants: Vec<String>,
}

impl Default for LanePolicyConfig {
    fn default() -> Self {
        Self {
            fast_classes: vec!["python".into(), "javascript".into()],
            max_fast_payload_bytes: 2000,
            slow_lane_variants: vec!["primary".into(), "secondary".into()],
        }
    }
}

/// Per-class execution budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Budget for classes missing from `per_class_secs`.
    pub default_secs: u64,
    /// Budget per job-class, in seconds.
    pub per_class_secs: BTreeMap<String, u64>,
    /// Timed-out jobs are pruned once their attempt count reaches this.
    pub retry_budget: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let per_class_secs = [
            ("python", 10 * 60),
            ("javascript", 10 * 60),
            ("go", 30 * 60),
            ("c#", 45 * 60),
            ("java", 45 * 60),
            ("c++", 60 * 60),
            ("rust", 120 * 60),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            default_secs: 20 * 60,
            per_class_secs,
            retry_budget: 3,
        }
    }
}

/// A named backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend name.
    pub name: String,
    /// `host:port` probed for reachability.
    pub address: String,
}

/// Backend health monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Backends to probe.
    pub backends: Vec<BackendConfig>,
    /// Backend preferred while healthy.
    pub primary: String,
    /// Fallback backend.
    pub secondary: String,
    /// Probe loop period in milliseconds.
    pub probe_interval_ms: u64,
    /// Per-probe connect timeout in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            backends: vec![
                BackendConfig {
                    name: "primary".into(),
                    address: "127.0.0.1:11437".into(),
                },
                BackendConfig {
                    name: "secondary".into(),
                    address: "127.0.0.1:11435".into(),
                },
            ],
            primary: "primary".into(),
            secondary: "secondary".into(),
            probe_interval_ms: 5_000,
            probe_timeout_ms: 1_500,
        }
    }
}

/// Correlation throttle limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Max concurrently accepted jobs per base project.
    pub max_per_base_project: usize,
    /// Delay before a deferred job is put back, in milliseconds.
    pub defer_delay_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_per_base_project: 3,
            defer_delay_ms: 2_000,
        }
    }
}

/// One escalation tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Tier name.
    pub name: String,
    /// Instruction text attached to variants of this tier.
    pub instruction: String,
}

/// Escalation engine policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Failed attempts before escalation replaces a plain requeue.
    pub threshold: u32,
    /// Jobs at this level are dropped instead of escalated again.
    pub max_level: u32,
    /// Variants synthesized per tier.
    pub variations_per_tier: u32,
    /// Priority of the first tier; each later tier adds one.
    pub base_priority: i32,
    /// Tiers in ascending aggressiveness.
    pub tiers: Vec<TierConfig>,
    /// Prior fixes attached to each variant.
    pub max_learned_fixes: usize,
    /// Emit a single proven-fix variant when a verified fix matches.
    pub short_circuit_known_fix: bool,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        let tiers = [
            (
                "conservative",
                "Focus on fixing specific identified errors while maintaining code quality.",
            ),
            (
                "moderate",
                "Be more aggressive with refactoring to fix root causes. Consider alternative approaches.",
            ),
            (
                "aggressive",
                "Completely rewrite if necessary. Try different design patterns and libraries.",
            ),
            (
                "nuclear",
                "Use the most powerful approach available. Break compatibility if needed to make it work.",
            ),
        ]
        .into_iter()
        .map(|(name, instruction)| TierConfig {
            name: name.into(),
            instruction: instruction.into(),
        })
        .collect();
        Self {
            threshold: 4,
            max_level: 2,
            variations_per_tier: 2,
            base_priority: 5,
            tiers,
            max_learned_fixes: 3,
            short_circuit_known_fix: true,
        }
    }
}

/// Loop periods, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    /// Job store change polling.
    pub change_poll_ms: u64,
    /// Timeout supervisor tick.
    pub supervisor_tick_ms: u64,
    /// Status snapshot rewrite.
    pub status_write_ms: u64,
    /// Bounded wait when both lanes are empty.
    pub idle_wait_ms: u64,
    /// Forced full rescan of the job store.
    pub full_rescan_ms: u64,
    /// Inbox directory polling.
    pub inbox_poll_ms: u64,
    /// All-idle-with-backlog duration that triggers a rescan.
    pub stuck_threshold_ms: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            change_poll_ms: 2_000,
            supervisor_tick_ms: 30_000,
            status_write_ms: 30_000,
            idle_wait_ms: 1_000,
            full_rescan_ms: 5 * 60_000,
            inbox_poll_ms: 3_000,
            stuck_threshold_ms: 120_000,
        }
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of persistent workers.
    pub worker_count: usize,
    /// File locations.
    pub paths: PathsConfig,
    /// Lane classification.
    pub lanes: LanePolicyConfig,
    /// Timeout table.
    pub timeouts: TimeoutConfig,
    /// Backend health.
    pub health: HealthConfig,
    /// Correlation throttle.
    pub throttle: ThrottleConfig,
    /// Escalation policy.
    pub escalation: EscalationConfig,
    /// Loop periods.
    pub intervals: IntervalsConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            paths: PathsConfig::default(),
            lanes: LanePolicyConfig::default(),
            timeouts: TimeoutConfig::default(),
            health: HealthConfig::default(),
            throttle: ThrottleConfig::default(),
            escalation: EscalationConfig::default(),
            intervals: IntervalsConfig::default(),
        }
    }
}

impl HealthConfig {
    /// Validate backend references.
    pub fn validate(&self) -> Result<(), String> {
        if self.backends.is_empty() {
            return Err("at least one backend must be defined".into());
        }
        for wanted in [&self.primary, &self.secondary] {
            if !self.backends.iter().any(|b| &b.name == wanted) {
                return Err(format!("backend `{wanted}` is not defined"));
            }
        }
        if self.probe_interval_ms == 0 || self.probe_timeout_ms == 0 {
            return Err("probe intervals must be greater than 0".into());
        }
        Ok(())
    }

    /// Probe period.
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Probe timeout.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl EscalationConfig {
    /// Validate tier and threshold values.
    pub fn validate(&self) -> Result<(), String> {
        if self.threshold == 0 {
            return Err("escalation threshold must be greater than 0".into());
        }
        if self.tiers.is_empty() {
            return Err("at least one escalation tier must be defined".into());
        }
        if self.variations_per_tier == 0 {
            return Err("variations_per_tier must be greater than 0".into());
        }
        Ok(())
    }
}

impl SchedulerConfig {
    /// Validate all sections.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.lanes.fast_classes.is_empty() {
            return Err("lanes.fast_classes must not be empty".into());
        }
        if self.timeouts.default_secs == 0 || self.timeouts.per_class_secs.values().any(|v| *v == 0)
        {
            return Err("timeouts must be greater than 0".into());
        }
        if self.throttle.max_per_base_project == 0 {
            return Err("throttle.max_per_base_project must be greater than 0".into());
        }
        self.health
            .validate()
            .map_err(|e| format!("health invalid: {e}"))?;
        for variant in &self.lanes.slow_lane_variants {
            if !self.health.backends.iter().any(|b| &b.name == variant) {
                return Err(format!("slow lane variant `{variant}` is not a defined backend"));
            }
        }
        self.escalation
            .validate()
            .map_err(|e| format!("escalation invalid: {e}"))?;
        let i = &self.intervals;
        if [
            i.change_poll_ms,
            i.supervisor_tick_ms,
            i.status_write_ms,
            i.idle_wait_ms,
            i.full_rescan_ms,
            i.inbox_poll_ms,
        ]
        .contains(&0)
        {
            return Err("intervals must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and validate a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        Self::from_json_str(&raw)
    }

    /// Apply `LANE_SCHEDULER_*` overrides from the process environment,
    /// loading `.env` first if present.
    pub fn apply_env(&mut self) -> Result<(), String> {
        let _ = dotenvy::dotenv();
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, then re-validate.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(workers) = lookup("LANE_SCHEDULER_WORKERS") {
            self.worker_count = if workers.eq_ignore_ascii_case("auto") {
                num_cpus::get()
            } else {
                workers
                    .parse()
                    .map_err(|e| format!("LANE_SCHEDULER_WORKERS: {e}"))?
            };
        }
        if let Some(path) = lookup("LANE_SCHEDULER_STORE") {
            self.paths.job_store = PathBuf::from(path);
        }
        if let Some(path) = lookup("LANE_SCHEDULER_STATUS") {
            self.paths.status_file = PathBuf::from(path);
        }
        if let Some(path) = lookup("LANE_SCHEDULER_LEARNING_DB") {
            self.paths.learning_db = PathBuf::from(path);
        }
        if let Some(path) = lookup("LANE_SCHEDULER_INBOX") {
            self.paths.inbox_dir = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(path) = lookup("LANE_SCHEDULER_AUDIT_LOG") {
            self.paths.audit_log = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        self.validate()
    }

    /// Execution budget for a job-class.
    #[must_use]
    pub fn timeout_for(&self, job_class: &str) -> Duration {
        let secs = self
            .timeouts
            .per_class_secs
            .get(&job_class.to_lowercase())
            .copied()
            .unwrap_or(self.timeouts.default_secs);
        Duration::from_secs(secs)
    }
}
