//! Persisted job collection.
//!
//! The store is a JSON array of job descriptors. Reads take a shared advisory
//! lock; updates take an exclusive lock, apply a transform and replace the file
//! atomically. Titles are unique in everything the store writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde_json::Value;

use crate::core::{Job, SchedulerError};
use crate::infra::atomic_file::{read_optional, write_json_atomic, FileLock};

/// Size and modification time of the store file, compared by change
/// detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMarker {
    /// File length in bytes.
    pub len: u64,
    /// Last modification time, when the platform reports one.
    pub modified: Option<SystemTime>,
}

/// An element that failed validation while loading.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedEntry {
    /// Title, when the element had a string title at all.
    pub title: Option<String>,
    /// Why it was rejected.
    pub reason: String,
}

/// Result of parsing the store file.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    /// Valid jobs, unique by title, in file order.
    pub jobs: Vec<Job>,
    /// Elements dropped by validation.
    pub rejected: Vec<RejectedEntry>,
    /// True when the file existed but was not a JSON array.
    pub corrupt: bool,
}

/// File-backed job store.
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    /// Store backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a consistent snapshot of the store.
    ///
    /// A corrupt file reads as empty; invalid elements are skipped. Both are
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the file exists but cannot be read.
    pub fn load(&self) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.load_snapshot()?.jobs)
    }

    /// Like [`JobStore::load`] but also reports what was rejected.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the file exists but cannot be read.
    pub fn load_snapshot(&self) -> Result<StoreSnapshot, SchedulerError> {
        let _lock = FileLock::shared(&self.path)?;
        self.read_unlocked()
    }

    /// Apply `transform` under an exclusive lock and atomically write the
    /// result. Duplicate titles in the transformed collection collapse to the
    /// last occurrence. Returns the collection as written.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` or `SchedulerError::Serialization` if the
    /// new content cannot be written; the previous content stays intact.
    pub fn atomic_update<F>(&self, transform: F) -> Result<Vec<Job>, SchedulerError>
    where
        F: FnOnce(Vec<Job>) -> Vec<Job>,
    {
        let _lock = FileLock::exclusive(&self.path)?;
        let current = self.read_unlocked()?.jobs;
        let next = dedup_by_title(transform(current));
        write_json_atomic(&self.path, &next)?;
        Ok(next)
    }

    /// Insert `job`, overwriting any entry with the same title. Returns true
    /// when the title was not present before.
    ///
    /// # Errors
    ///
    /// See [`JobStore::atomic_update`].
    pub fn append(&self, job: Job) -> Result<bool, SchedulerError> {
        let mut inserted = false;
        self.atomic_update(|mut jobs| {
            if let Some(existing) = jobs.iter_mut().find(|j| j.title == job.title) {
                *existing = job;
            } else {
                inserted = true;
                jobs.push(job);
            }
            jobs
        })?;
        Ok(inserted)
    }

    /// Append the jobs whose title is not stored yet. Existing entries are left
    /// untouched so a producer cannot reset a running job's attempt count.
    /// Returns the titles that were added.
    ///
    /// # Errors
    ///
    /// See [`JobStore::atomic_update`].
    pub fn insert_new(&self, candidates: Vec<Job>) -> Result<Vec<String>, SchedulerError> {
        let mut added = Vec::new();
        self.atomic_update(|mut jobs| {
            added = push_new(&mut jobs, candidates);
            jobs
        })?;
        Ok(added)
    }

    /// Delete the entry with `title`. Returns true when something was removed.
    ///
    /// # Errors
    ///
    /// See [`JobStore::atomic_update`].
    pub fn remove(&self, title: &str) -> Result<bool, SchedulerError> {
        let mut removed = false;
        self.atomic_update(|mut jobs| {
            let before = jobs.len();
            jobs.retain(|j| j.title != title);
            removed = jobs.len() != before;
            jobs
        })?;
        Ok(removed)
    }

    /// Remove `title` and append `replacements` in one update. Replacements
    /// whose title is already stored are skipped. Returns the titles that were
    /// actually added.
    ///
    /// # Errors
    ///
    /// See [`JobStore::atomic_update`].
    pub fn replace(&self, title: &str, replacements: Vec<Job>) -> Result<Vec<String>, SchedulerError> {
        let mut added = Vec::new();
        self.atomic_update(|mut jobs| {
            jobs.retain(|j| j.title != title);
            added = push_new(&mut jobs, replacements);
            jobs
        })?;
        Ok(added)
    }

    /// Current size/mtime marker, `None` when the file does not exist.
    pub fn marker(&self) -> Option<FileMarker> {
        let meta = std::fs::metadata(&self.path).ok()?;
        Some(FileMarker {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    fn read_unlocked(&self) -> Result<StoreSnapshot, SchedulerError> {
        let Some(raw) = read_optional(&self.path)? else {
            return Ok(StoreSnapshot::default());
        };
        let snapshot = parse_store(&raw);
        if snapshot.corrupt {
            tracing::warn!(path = %self.path.display(), "job store is corrupt, treating as empty");
        }
        for rejected in &snapshot.rejected {
            tracing::warn!(
                path = %self.path.display(),
                title = rejected.title.as_deref().unwrap_or("<none>"),
                reason = %rejected.reason,
                "dropping invalid job descriptor"
            );
        }
        Ok(snapshot)
    }
}

/// Parse raw store content leniently.
pub fn parse_store(raw: &str) -> StoreSnapshot {
    if raw.trim().is_empty() {
        return StoreSnapshot::default();
    }
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) else {
        return StoreSnapshot {
            corrupt: true,
            ..StoreSnapshot::default()
        };
    };
    let mut snapshot = StoreSnapshot::default();
    let mut jobs = Vec::with_capacity(items.len());
    for item in items {
        let title = item
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);
        match Job::from_value(item) {
            Ok(job) => jobs.push(job),
            Err(e) => snapshot.rejected.push(RejectedEntry {
                title,
                reason: e.to_string(),
            }),
        }
    }
    snapshot.jobs = dedup_by_title(jobs);
    snapshot
}

fn push_new(jobs: &mut Vec<Job>, candidates: Vec<Job>) -> Vec<String> {
    let mut added = Vec::new();
    for job in candidates {
        if jobs.iter().any(|j| j.title == job.title) {
            continue;
        }
        added.push(job.title.clone());
        jobs.push(job);
    }
    added
}

/// Collapse duplicate titles, keeping the last value at the first position.
fn dedup_by_title(jobs: Vec<Job>) -> Vec<Job> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(jobs.len());
    let mut out: Vec<Job> = Vec::with_capacity(jobs.len());
    for job in jobs {
        if let Some(&at) = index.get(&job.title) {
            out[at] = job;
        } else {
            index.insert(job.title.clone(), out.len());
            out.push(job);
        }
    }
    out
}
