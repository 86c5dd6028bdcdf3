//! Polling change detection over the job store.
//!
//! Producers write the store file directly; the scheduler notices by comparing
//! its size and modification time with the last observation. No push
//! notification is involved.

use std::collections::HashSet;

use crate::core::{Job, SchedulerError};
use crate::infra::job_store::{FileMarker, JobStore, StoreSnapshot};

/// Diffs the job store between polls.
pub struct ChangeDetector {
    store: JobStore,
    last_marker: Option<FileMarker>,
    seen: HashSet<String>,
    primed: bool,
}

impl ChangeDetector {
    /// Detector over `store`. The first poll reports every entry.
    pub fn new(store: JobStore) -> Self {
        Self {
            store,
            last_marker: None,
            seen: HashSet::new(),
            primed: false,
        }
    }

    /// Store being watched.
    pub const fn store(&self) -> &JobStore {
        &self.store
    }

    /// Return entries whose titles were not present at the previous poll.
    /// Returns nothing without reading the file when the marker is unchanged.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the store exists but cannot be read.
    pub fn poll(&mut self) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.poll_snapshot()?.map(|s| s.jobs).unwrap_or_default())
    }

    /// Like [`ChangeDetector::poll`] but returns the full snapshot (including
    /// rejected elements) with `jobs` narrowed to new entries. `None` means
    /// the marker did not change.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the store exists but cannot be read.
    pub fn poll_snapshot(&mut self) -> Result<Option<StoreSnapshot>, SchedulerError> {
        let marker = self.store.marker();
        if self.primed && marker == self.last_marker {
            return Ok(None);
        }
        let mut snapshot = self.store.load_snapshot()?;
        self.last_marker = marker;
        self.primed = true;
        let current: HashSet<String> = snapshot.jobs.iter().map(|j| j.title.clone()).collect();
        snapshot.jobs.retain(|j| !self.seen.contains(&j.title));
        self.seen = current;
        Ok(Some(snapshot))
    }

    /// Drop `title` from the seen set so the next poll reports it again if it
    /// is re-added. Called after the scheduler prunes a title.
    pub fn forget(&mut self, title: &str) {
        self.seen.remove(title);
    }

    /// Ignore the marker and return every entry currently stored. Catches
    /// writes that landed within the filesystem's mtime granularity.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the store exists but cannot be read.
    pub fn force_rescan(&mut self) -> Result<Vec<Job>, SchedulerError> {
        let marker = self.store.marker();
        let jobs = self.store.load()?;
        self.last_marker = marker;
        self.primed = true;
        self.seen = jobs.iter().map(|j| j.title.clone()).collect();
        Ok(jobs)
    }
}
