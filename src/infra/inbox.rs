//! Drop-directory intake.
//!
//! Producers that cannot safely rewrite the job store can drop `*.json` files
//! holding one descriptor or an array of them. Each file is merged into the
//! store and deleted. Files that do not parse are renamed with a `.rejected`
//! suffix so they are not retried forever.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::core::{Job, SchedulerError};
use crate::infra::job_store::JobStore;

/// Outcome of one inbox sweep.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InboxReport {
    /// Titles merged into the store.
    pub accepted: Vec<String>,
    /// Titles skipped because the store already held them.
    pub duplicates: Vec<String>,
    /// Descriptor-level validation failures, as `(file, reason)`.
    pub invalid: Vec<(PathBuf, String)>,
    /// Files renamed with `.rejected`.
    pub rejected_files: Vec<PathBuf>,
}

/// Inbox directory watcher.
#[derive(Debug, Clone)]
pub struct Inbox {
    dir: PathBuf,
}

impl Inbox {
    /// Inbox rooted at `dir`; the directory is created on first sweep.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Inbox directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Merge every pending file into `store`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the directory cannot be listed or the
    /// store cannot be written. Per-file problems are reported, not returned.
    pub fn sweep(&self, store: &JobStore) -> Result<InboxReport, SchedulerError> {
        fs::create_dir_all(&self.dir).map_err(|e| SchedulerError::io(&self.dir, e))?;
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)
            .map_err(|e| SchedulerError::io(&self.dir, e))?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        let mut report = InboxReport::default();
        for path in files {
            let items = match read_items(&path) {
                Ok(items) => items,
                Err(reason) => {
                    tracing::warn!(path = %path.display(), reason = %reason, "rejecting inbox file");
                    let mut rejected = path.clone().into_os_string();
                    rejected.push(".rejected");
                    let rejected = PathBuf::from(rejected);
                    fs::rename(&path, &rejected).map_err(|e| SchedulerError::io(&path, e))?;
                    report.rejected_files.push(rejected);
                    continue;
                }
            };

            let mut jobs = Vec::with_capacity(items.len());
            for item in items {
                match Job::from_value(item) {
                    Ok(job) => jobs.push(job),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "dropping invalid inbox descriptor");
                        report.invalid.push((path.clone(), e.to_string()));
                    }
                }
            }
            let titles: Vec<String> = jobs.iter().map(|j| j.title.clone()).collect();
            let mut added = if jobs.is_empty() {
                Vec::new()
            } else {
                store.insert_new(jobs)?
            };
            fs::remove_file(&path).map_err(|e| SchedulerError::io(&path, e))?;
            for title in titles {
                if let Some(at) = added.iter().position(|t| *t == title) {
                    added.swap_remove(at);
                    report.accepted.push(title);
                } else {
                    tracing::debug!(path = %path.display(), title = %title, "inbox title already stored");
                    report.duplicates.push(title);
                }
            }
        }
        Ok(report)
    }
}

fn read_items(path: &Path) -> Result<Vec<Value>, String> {
    let raw = fs::read_to_string(path).map_err(|e| e.to_string())?;
    match serde_json::from_str::<Value>(&raw).map_err(|e| e.to_string())? {
        Value::Array(items) => Ok(items),
        obj @ Value::Object(_) => Ok(vec![obj]),
        other => Err(format!("expected an object or array, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sweep_merges_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = Inbox::new(dir.path().join("inbox"));
        let store = JobStore::new(dir.path().join("jobs.json"));
        fs::create_dir_all(inbox.dir()).unwrap();
        fs::write(inbox.dir().join("one.json"), json!({"title": "a"}).to_string()).unwrap();
        fs::write(
            inbox.dir().join("two.json"),
            json!([{"title": "b", "job_class": "rust"}, {"nope": 1}]).to_string(),
        )
        .unwrap();
        fs::write(inbox.dir().join("notes.txt"), "ignored").unwrap();

        let report = inbox.sweep(&store).unwrap();
        assert_eq!(report.accepted, vec!["a", "b"]);
        assert_eq!(report.invalid.len(), 1);
        assert!(!inbox.dir().join("one.json").exists());
        assert!(inbox.dir().join("notes.txt").exists());
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[test]
    fn test_sweep_does_not_overwrite_stored_job() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = Inbox::new(dir.path().join("inbox"));
        let store = JobStore::new(dir.path().join("jobs.json"));
        let mut running = Job::new("a", "python", Value::Null);
        running.attempt_count = 3;
        store.append(running).unwrap();
        fs::create_dir_all(inbox.dir()).unwrap();
        fs::write(
            inbox.dir().join("again.json"),
            json!([{"title": "a"}, {"title": "c"}]).to_string(),
        )
        .unwrap();

        let report = inbox.sweep(&store).unwrap();
        assert_eq!(report.accepted, vec!["c"]);
        assert_eq!(report.duplicates, vec!["a"]);
        let jobs = store.load().unwrap();
        assert_eq!(jobs[0].title, "a");
        assert_eq!(jobs[0].attempt_count, 3);
        assert!(!inbox.dir().join("again.json").exists());
    }

    #[test]
    fn test_unparseable_file_is_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = Inbox::new(dir.path().join("inbox"));
        let store = JobStore::new(dir.path().join("jobs.json"));
        fs::create_dir_all(inbox.dir()).unwrap();
        fs::write(inbox.dir().join("bad.json"), "{{{").unwrap();

        let report = inbox.sweep(&store).unwrap();
        assert!(report.accepted.is_empty());
        assert_eq!(report.rejected_files.len(), 1);
        assert!(inbox.dir().join("bad.json.rejected").exists());
        assert!(inbox.sweep(&store).unwrap().rejected_files.is_empty());
    }
}
