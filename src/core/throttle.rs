//! Correlation throttle.
//!
//! Bounds how many jobs sharing a base-project id may be accepted at once.
//! Acceptance hands out a [`ThrottlePermit`]; dropping the permit releases the
//! slot, so the count goes down on success, failure and cancellation alike.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// In-memory map of base-project id to active count.
#[derive(Debug, Clone)]
pub struct CorrelationThrottle {
    max_per_key: usize,
    active: Arc<Mutex<HashMap<String, usize>>>,
}

/// Proof that a job was accepted under the throttle.
#[derive(Debug)]
pub struct ThrottlePermit {
    key: Option<String>,
    active: Arc<Mutex<HashMap<String, usize>>>,
}

impl CorrelationThrottle {
    /// Create a throttle allowing `max_per_key` concurrent jobs per key.
    #[must_use]
    pub fn new(max_per_key: usize) -> Self {
        Self {
            max_per_key: max_per_key.max(1),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Try to accept a job correlated to `key`.
    ///
    /// Jobs without a key are always accepted. The check and the increment
    /// happen under one lock, so racing workers cannot overshoot the cap.
    pub fn try_acquire(&self, key: Option<&str>) -> Option<ThrottlePermit> {
        let Some(key) = key else {
            return Some(ThrottlePermit {
                key: None,
                active: Arc::clone(&self.active),
            });
        };
        let mut active = self.active.lock();
        let count = active.entry(key.to_string()).or_insert(0);
        if *count >= self.max_per_key {
            return None;
        }
        *count += 1;
        Some(ThrottlePermit {
            key: Some(key.to_string()),
            active: Arc::clone(&self.active),
        })
    }

    /// Active count for `key`.
    pub fn active(&self, key: &str) -> usize {
        self.active.lock().get(key).copied().unwrap_or(0)
    }

    /// Configured cap.
    #[must_use]
    pub const fn max_per_key(&self) -> usize {
        self.max_per_key
    }

    /// Snapshot of all non-zero counts.
    pub fn snapshot(&self) -> HashMap<String, usize> {
        self.active.lock().clone()
    }
}

impl ThrottlePermit {
    /// Key this permit counts against.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                active.remove(&key);
            }
        }
    }
}
