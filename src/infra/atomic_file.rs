//! Crash-safe file replacement and advisory locking.
//!
//! Writers stage the new content in a temporary file next to the target and
//! rename it over the target on commit. A crash before the rename leaves the
//! previous content untouched; the orphaned temporary file is removed when the
//! staging handle drops.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::core::SchedulerError;

/// A write that has been staged but not yet made visible.
pub struct StagedWrite {
    target: PathBuf,
    tmp: NamedTempFile,
}

impl StagedWrite {
    /// Write `bytes` to a temporary file in the target's directory.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the directory cannot be created or the
    /// temporary file cannot be written and flushed.
    pub fn stage(target: &Path, bytes: &[u8]) -> Result<Self, SchedulerError> {
        let dir = parent_dir(target);
        fs::create_dir_all(&dir).map_err(|e| SchedulerError::io(&dir, e))?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| SchedulerError::io(&dir, e))?;
        tmp.write_all(bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| SchedulerError::io(tmp.path(), e))?;
        Ok(Self {
            target: target.to_path_buf(),
            tmp,
        })
    }

    /// Path of the staged temporary file.
    pub fn temp_path(&self) -> &Path {
        self.tmp.path()
    }

    /// Atomically rename the staged file over the target.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the rename fails; the target keeps its
    /// previous content in that case.
    pub fn commit(self) -> Result<(), SchedulerError> {
        let target = self.target;
        self.tmp
            .persist(&target)
            .map_err(|e| SchedulerError::io(&target, e.error))?;
        Ok(())
    }
}

/// Replace `target` with `bytes` atomically.
///
/// # Errors
///
/// See [`StagedWrite::stage`] and [`StagedWrite::commit`].
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), SchedulerError> {
    StagedWrite::stage(target, bytes)?.commit()
}

/// Serialize `value` as pretty JSON and replace `target` atomically.
///
/// # Errors
///
/// Returns `SchedulerError::Serialization` if encoding fails, otherwise see
/// [`write_atomic`].
pub fn write_json_atomic<T: Serialize + ?Sized>(
    target: &Path,
    value: &T,
) -> Result<(), SchedulerError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_atomic(target, &bytes)
}

/// Read a file to a string, returning `None` when it does not exist.
///
/// # Errors
///
/// Returns `SchedulerError::Io` for any failure other than `NotFound`.
pub fn read_optional(path: &Path) -> Result<Option<String>, SchedulerError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SchedulerError::io(path, e)),
    }
}

/// Advisory lock held on a sidecar `<file>.lock` next to the guarded file.
///
/// The guarded file itself is replaced by rename on every write, so locking
/// its inode would not exclude other processes; the sidecar is stable.
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Block until an exclusive lock is held.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the lock file cannot be opened or
    /// locked.
    pub fn exclusive(guarded: &Path) -> Result<Self, SchedulerError> {
        let (path, file) = open_lock_file(guarded)?;
        file.lock().map_err(|e| SchedulerError::io(&path, e))?;
        Ok(Self { file })
    }

    /// Block until a shared lock is held.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the lock file cannot be opened or
    /// locked.
    pub fn shared(guarded: &Path) -> Result<Self, SchedulerError> {
        let (path, file) = open_lock_file(guarded)?;
        file.lock_shared().map_err(|e| SchedulerError::io(&path, e))?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(error = %e, "failed to release file lock");
        }
    }
}

/// Sidecar lock path for `guarded`.
#[must_use]
pub fn lock_path(guarded: &Path) -> PathBuf {
    let mut name = guarded
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".lock");
    parent_dir(guarded).join(name)
}

fn open_lock_file(guarded: &Path) -> Result<(PathBuf, File), SchedulerError> {
    let dir = parent_dir(guarded);
    fs::create_dir_all(&dir).map_err(|e| SchedulerError::io(&dir, e))?;
    let path = lock_path(guarded);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| SchedulerError::io(&path, e))?;
    Ok((path, file))
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
