//! Worker slots and pool counters.
//!
//! The board is the shared status structure every worker publishes to before
//! and after each phase. The timeout supervisor reads it and cancels slots
//! that overrun; the status snapshot serializes it for external monitors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::{Job, LaneKind};
use crate::util::clock::now_ms;

/// Lifecycle state of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Waiting for work.
    Idle,
    /// Running a job.
    Working,
    /// Cancelled by the supervisor and unwinding.
    TimeoutRestart,
}

/// Public view of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSlot {
    /// Worker identity, `0..N`.
    pub id: usize,
    /// Current status.
    pub status: WorkerStatus,
    /// Title of the current job.
    pub job_title: Option<String>,
    /// Class of the current job.
    pub job_class: Option<String>,
    /// Lane the current job came from.
    pub lane: Option<LaneKind>,
    /// Backend the worker is running against.
    pub backend: Option<String>,
    /// Start of the current phase in milliseconds since epoch.
    pub started_at_ms: Option<u64>,
    /// Title of the last job this worker let go of.
    pub last_completed: Option<String>,
}

impl WorkerSlot {
    const fn idle(id: usize) -> Self {
        Self {
            id,
            status: WorkerStatus::Idle,
            job_title: None,
            job_class: None,
            lane: None,
            backend: None,
            started_at_ms: None,
            last_completed: None,
        }
    }
}

struct SlotState {
    slot: WorkerSlot,
    started: Option<Instant>,
    cancel: Option<CancellationToken>,
}

/// A worker the supervisor just cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedOutWorker {
    /// Worker identity.
    pub worker_id: usize,
    /// Job it was running.
    pub title: String,
    /// Class of that job.
    pub job_class: String,
    /// How long the phase had been running.
    pub elapsed: Duration,
}

/// Shared worker status structure.
pub struct WorkerBoard {
    slots: Mutex<Vec<SlotState>>,
}

impl WorkerBoard {
    /// Create `count` idle slots.
    #[must_use]
    pub fn new(count: usize) -> Self {
        let slots = (0..count)
            .map(|id| SlotState {
                slot: WorkerSlot::idle(id),
                started: None,
                cancel: None,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// True when the board has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Mark a worker as working on `job` and return the token the supervisor
    /// will cancel on timeout. The token is a child of `parent`, so shutdown
    /// cancels it as well.
    pub fn begin(
        &self,
        worker_id: usize,
        job: &Job,
        lane: LaneKind,
        backend: Option<String>,
        parent: &CancellationToken,
    ) -> CancellationToken {
        let token = parent.child_token();
        {
            let mut slots = self.slots.lock();
            if let Some(state) = slots.get_mut(worker_id) {
                state.slot.status = WorkerStatus::Working;
                state.slot.job_title = Some(job.title.clone());
                state.slot.job_class = Some(job.job_class.clone());
                state.slot.lane = Some(lane);
                state.slot.backend = backend;
                state.slot.started_at_ms = Some(now_ms());
                state.started = Some(Instant::now());
                state.cancel = Some(token.clone());
            }
        }
        token
    }

    /// Start a new phase on the same job (a slow-lane backend variant). The
    /// timeout clock restarts.
    pub fn next_phase(&self, worker_id: usize, backend: Option<String>) {
        let mut slots = self.slots.lock();
        if let Some(state) = slots.get_mut(worker_id) {
            if state.slot.status == WorkerStatus::Working {
                state.slot.backend = backend;
                state.slot.started_at_ms = Some(now_ms());
                state.started = Some(Instant::now());
            }
        }
    }

    /// Return a worker to idle. A slot cancelled by the supervisor keeps its
    /// timeout marker as `last_completed`.
    pub fn finish(&self, worker_id: usize, last_completed: Option<String>) {
        let mut slots = self.slots.lock();
        if let Some(state) = slots.get_mut(worker_id) {
            let last = if state.slot.status == WorkerStatus::TimeoutRestart {
                state.slot.last_completed.take()
            } else {
                last_completed.or_else(|| state.slot.last_completed.take())
            };
            state.slot = WorkerSlot::idle(worker_id);
            state.slot.last_completed = last;
            state.started = None;
            state.cancel = None;
        }
    }

    /// Cancel every working slot whose phase exceeded its budget.
    ///
    /// `budget` maps a job-class to its allowed duration. Cancelled slots move
    /// to `TimeoutRestart`; the worker returns them to idle once it unwinds.
    pub fn cancel_overdue<F>(&self, now: Instant, budget: F) -> Vec<TimedOutWorker>
    where
        F: Fn(&str) -> Duration,
    {
        let mut overdue = Vec::new();
        let mut slots = self.slots.lock();
        for state in slots.iter_mut() {
            if state.slot.status != WorkerStatus::Working {
                continue;
            }
            let (Some(started), Some(class)) = (state.started, state.slot.job_class.clone())
            else {
                continue;
            };
            let elapsed = now.saturating_duration_since(started);
            if elapsed <= budget(&class) {
                continue;
            }
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            let title = state.slot.job_title.take().unwrap_or_default();
            state.slot.status = WorkerStatus::TimeoutRestart;
            state.slot.started_at_ms = None;
            state.slot.backend = None;
            state.slot.last_completed = Some(format!("TIMEOUT: {title}"));
            state.started = None;
            overdue.push(TimedOutWorker {
                worker_id: state.slot.id,
                title,
                job_class: class,
                elapsed,
            });
        }
        overdue
    }

    /// Status of one worker.
    pub fn status(&self, worker_id: usize) -> Option<WorkerStatus> {
        self.slots.lock().get(worker_id).map(|s| s.slot.status)
    }

    /// Copy of every slot.
    pub fn snapshot(&self) -> Vec<WorkerSlot> {
        self.slots.lock().iter().map(|s| s.slot.clone()).collect()
    }

    /// Number of slots currently working.
    pub fn working(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|s| s.slot.status == WorkerStatus::Working)
            .count()
    }
}

/// Statistics about pool throughput.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Jobs dispatched to a worker.
    pub dispatched: u64,
    /// Jobs that completed.
    pub completed: u64,
    /// Failed attempts.
    pub failed: u64,
    /// Jobs put back after a failure or timeout.
    pub requeued: u64,
    /// Timeouts enforced by the supervisor.
    pub timed_out: u64,
    /// Escalations performed.
    pub escalated: u64,
    /// Jobs dropped for good.
    pub dropped: u64,
    /// Throttle deferrals.
    pub deferred: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub struct PoolCounters {
    /// See [`PoolStats::dispatched`].
    pub dispatched: AtomicU64,
    /// See [`PoolStats::completed`].
    pub completed: AtomicU64,
    /// See [`PoolStats::failed`].
    pub failed: AtomicU64,
    /// See [`PoolStats::requeued`].
    pub requeued: AtomicU64,
    /// See [`PoolStats::timed_out`].
    pub timed_out: AtomicU64,
    /// See [`PoolStats::escalated`].
    pub escalated: AtomicU64,
    /// See [`PoolStats::dropped`].
    pub dropped: AtomicU64,
    /// See [`PoolStats::deferred`].
    pub deferred: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            escalated: self.escalated.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
        }
    }

    /// Increment one counter.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
