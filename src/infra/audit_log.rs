//! JSON-lines audit log.
//!
//! Every event is appended as one line. Write failures are logged and the
//! event is dropped; auditing never stops the scheduler.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::core::audit::{AuditEvent, AuditSink};
use crate::core::SchedulerError;

/// File-backed audit sink using JSON lines.
pub struct JsonlAuditSink {
    path: PathBuf,
    file: File,
}

impl JsonlAuditSink {
    /// Open (or create) the log at `path` in append mode.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the directory or file cannot be
    /// created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(dir).map_err(|e| SchedulerError::io(dir, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SchedulerError::io(&path, e))?;
        Ok(Self { path, file })
    }

    /// Log file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every parseable event back; malformed lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the file cannot be read.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<AuditEvent>, SchedulerError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SchedulerError::io(path, e))?;
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| SchedulerError::io(path, e))?;
            if let Ok(event) = serde_json::from_str(&line) {
                events.push(event);
            }
        }
        Ok(events)
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&mut self, event: AuditEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode audit event");
                return;
            }
        };
        if let Err(e) = writeln!(self.file, "{line}") {
            tracing::error!(path = %self.path.display(), error = %e, "failed to append audit event");
        }
    }
}
