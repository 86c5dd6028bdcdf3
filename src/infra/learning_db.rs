//! Learning database of verified fixes.
//!
//! Records are keyed by `"{signature}_{job_class}"` and are never deleted.
//! The file is read fresh on every query so that edits by other processes are
//! picked up without a restart.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::infra::atomic_file::{read_optional, write_json_atomic, FileLock};
use crate::util::clock::now_ms;

const MAX_MESSAGE_PATTERN_CHARS: usize = 200;
const MAX_FIX_CHARS: usize = 1000;

/// One verified fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRecord {
    /// Stable hash of the normalized failure.
    pub error_signature: String,
    /// Job-class the fix applies to.
    pub job_class: String,
    /// Failure classification.
    pub error_type: String,
    /// Truncated failure text, for humans.
    pub error_message_pattern: String,
    /// Stored fix snippet.
    pub fix: String,
    /// Times this fix led to a success.
    pub success_count: u32,
    /// Times this fix was tried.
    pub total_attempts: u32,
    /// True once the fix has produced at least one success.
    pub verified: bool,
    /// First success, milliseconds since epoch.
    pub created_at_ms: u64,
    /// Most recent use, milliseconds since epoch.
    pub last_used_ms: u64,
    /// Base projects the fix was applied to.
    #[serde(default)]
    pub projects: Vec<String>,
}

/// Input for [`LearningDb::record_success`].
#[derive(Debug, Clone)]
pub struct FixSuccess {
    /// Failure signature.
    pub error_signature: String,
    /// Job-class.
    pub job_class: String,
    /// Failure classification.
    pub error_type: String,
    /// Failure text.
    pub error_message: String,
    /// Fix snippet that worked.
    pub fix: String,
    /// Base project the fix was applied to.
    pub project: String,
}

/// Aggregate view over the database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningStats {
    /// Number of records.
    pub total_fixes: usize,
    /// Percentage of records reused at least once (`success_count > 1`).
    pub reuse_rate: f64,
    /// Number of verified records.
    pub verified: usize,
    /// Distinct job-classes with at least one record.
    pub classes: BTreeSet<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FixFile {
    #[serde(default)]
    fixes: BTreeMap<String, FixRecord>,
}

/// File-backed learning database.
#[derive(Debug, Clone)]
pub struct LearningDb {
    path: PathBuf,
}

impl LearningDb {
    /// Database backed by `path`; created on first success.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record key for a signature and class.
    #[must_use]
    pub fn key(signature: &str, job_class: &str) -> String {
        format!("{signature}_{job_class}")
    }

    /// All records ordered by key.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the file exists but cannot be read.
    pub fn records(&self) -> Result<Vec<FixRecord>, SchedulerError> {
        let _lock = FileLock::shared(&self.path)?;
        Ok(self.read_unlocked()?.fixes.into_values().collect())
    }

    /// Verified record for exactly this signature and class.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the file exists but cannot be read.
    pub fn find_verified(
        &self,
        signature: &str,
        job_class: &str,
    ) -> Result<Option<FixRecord>, SchedulerError> {
        let _lock = FileLock::shared(&self.path)?;
        let file = self.read_unlocked()?;
        Ok(file
            .fixes
            .get(&Self::key(signature, job_class))
            .filter(|r| r.verified)
            .cloned())
    }

    /// Prior fixes relevant to a failure, best first: records with the same
    /// signature (any class), then records with the same class and error
    /// type. Within each group higher success counts come first.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the file exists but cannot be read.
    pub fn similar_fixes(
        &self,
        signature: &str,
        job_class: &str,
        error_type: &str,
        limit: usize,
    ) -> Result<Vec<FixRecord>, SchedulerError> {
        let records = self.records()?;
        let (mut exact, rest): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|r| r.error_signature == signature);
        let mut by_type: Vec<_> = rest
            .into_iter()
            .filter(|r| r.job_class == job_class && r.error_type == error_type)
            .collect();
        exact.sort_by(|a, b| b.success_count.cmp(&a.success_count));
        by_type.sort_by(|a, b| b.success_count.cmp(&a.success_count));
        exact.extend(by_type);
        exact.truncate(limit);
        Ok(exact)
    }

    /// Insert a new verified record or bump the counters of an existing one.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` or `SchedulerError::Serialization` if the
    /// database cannot be rewritten.
    pub fn record_success(&self, success: FixSuccess) -> Result<FixRecord, SchedulerError> {
        let _lock = FileLock::exclusive(&self.path)?;
        let mut file = self.read_unlocked()?;
        let key = Self::key(&success.error_signature, &success.job_class);
        let now = now_ms();
        let record = file
            .fixes
            .entry(key)
            .and_modify(|r| {
                r.success_count = r.success_count.saturating_add(1);
                r.total_attempts = r.total_attempts.saturating_add(1);
                r.verified = true;
                r.last_used_ms = now;
                if !r.projects.contains(&success.project) {
                    r.projects.push(success.project.clone());
                }
            })
            .or_insert_with(|| FixRecord {
                error_signature: success.error_signature.clone(),
                job_class: success.job_class.clone(),
                error_type: success.error_type.clone(),
                error_message_pattern: truncate_chars(
                    &success.error_message,
                    MAX_MESSAGE_PATTERN_CHARS,
                ),
                fix: truncate_chars(&success.fix, MAX_FIX_CHARS),
                success_count: 1,
                total_attempts: 1,
                verified: true,
                created_at_ms: now,
                last_used_ms: now,
                projects: vec![success.project.clone()],
            })
            .clone();
        write_json_atomic(&self.path, &file)?;
        Ok(record)
    }

    /// Count a failed reuse of an existing record. Returns false when no such
    /// record exists.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` or `SchedulerError::Serialization` if the
    /// database cannot be rewritten.
    pub fn record_attempt(&self, signature: &str, job_class: &str) -> Result<bool, SchedulerError> {
        let _lock = FileLock::exclusive(&self.path)?;
        let mut file = self.read_unlocked()?;
        let Some(record) = file.fixes.get_mut(&Self::key(signature, job_class)) else {
            return Ok(false);
        };
        record.total_attempts = record.total_attempts.saturating_add(1);
        record.last_used_ms = now_ms();
        write_json_atomic(&self.path, &file)?;
        Ok(true)
    }

    /// Aggregate statistics.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the file exists but cannot be read.
    pub fn stats(&self) -> Result<LearningStats, SchedulerError> {
        let records = self.records()?;
        let total_fixes = records.len();
        let reused = records.iter().filter(|r| r.success_count > 1).count();
        #[allow(clippy::cast_precision_loss)]
        let reuse_rate = if total_fixes == 0 {
            0.0
        } else {
            reused as f64 / total_fixes as f64 * 100.0
        };
        Ok(LearningStats {
            total_fixes,
            reuse_rate,
            verified: records.iter().filter(|r| r.verified).count(),
            classes: records.into_iter().map(|r| r.job_class).collect(),
        })
    }

    fn read_unlocked(&self) -> Result<FixFile, SchedulerError> {
        let Some(raw) = read_optional(&self.path)? else {
            return Ok(FixFile::default());
        };
        if raw.trim().is_empty() {
            return Ok(FixFile::default());
        }
        match serde_json::from_str(&raw) {
            Ok(file) => Ok(file),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "learning db is corrupt, treating as empty");
                Ok(FixFile::default())
            }
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
