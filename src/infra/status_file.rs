//! Status snapshot for external monitors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::worker_pool::{PoolStats, WorkerSlot};
use crate::core::{BackendEndpoint, SchedulerError};
use crate::infra::atomic_file::{read_optional, write_json_atomic};

/// Everything an external monitor needs to judge scheduler health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Seconds since epoch when the snapshot was taken.
    pub timestamp: f64,
    /// Identity of the scheduler process that wrote it.
    pub instance_id: Uuid,
    /// Fast lane depth.
    pub fast_depth: usize,
    /// Slow lane depth.
    pub slow_depth: usize,
    /// Per-worker state.
    pub workers: Vec<WorkerSlot>,
    /// Per-backend health.
    pub backends: Vec<BackendEndpoint>,
    /// Currently preferred backend.
    pub preferred_backend: Option<String>,
    /// Active throttle counts by base project.
    #[serde(default)]
    pub throttle: BTreeMap<String, usize>,
    /// Throughput counters.
    #[serde(default)]
    pub stats: PoolStats,
}

/// Writer/reader for the status file.
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// Status file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the status file.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` or `SchedulerError::Serialization` on
    /// write failure.
    pub fn write(&self, snapshot: &StatusSnapshot) -> Result<(), SchedulerError> {
        write_json_atomic(&self.path, snapshot)
    }

    /// Read the last snapshot, `None` if none was written yet.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` on read failure and
    /// `SchedulerError::Serialization` if the file is not a snapshot.
    pub fn read(&self) -> Result<Option<StatusSnapshot>, SchedulerError> {
        read_optional(&self.path)?
            .map(|raw| serde_json::from_str(&raw).map_err(SchedulerError::from))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HealthState;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = StatusFile::new(dir.path().join("status.json"));
        assert!(file.read().unwrap().is_none());

        let snapshot = StatusSnapshot {
            timestamp: 1.5,
            instance_id: Uuid::new_v4(),
            fast_depth: 2,
            slow_depth: 1,
            workers: Vec::new(),
            backends: vec![BackendEndpoint {
                name: "primary".into(),
                address: "127.0.0.1:1".into(),
                health: HealthState::Down,
            }],
            preferred_backend: None,
            throttle: BTreeMap::new(),
            stats: PoolStats::default(),
        };
        file.write(&snapshot).unwrap();
        assert_eq!(file.read().unwrap(), Some(snapshot));
    }
}
