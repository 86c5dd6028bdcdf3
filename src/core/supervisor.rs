//! Timeout supervisor.
//!
//! Compares each working slot's phase start against the budget for its
//! job-class and cancels slots that overran. Cancellation is cooperative: the
//! worker sees its token fire at the next suspension point, hands the job to
//! the requeue-or-prune path and goes back to its loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::TimeoutConfig;
use crate::core::worker_pool::{TimedOutWorker, WorkerBoard};

/// Job-class to execution budget.
#[derive(Debug, Clone)]
pub struct TimeoutTable {
    default: Duration,
    per_class: HashMap<String, Duration>,
}

impl TimeoutTable {
    /// Build from configuration.
    #[must_use]
    pub fn from_config(cfg: &TimeoutConfig) -> Self {
        Self {
            default: Duration::from_secs(cfg.default_secs),
            per_class: cfg
                .per_class_secs
                .iter()
                .map(|(class, secs)| (class.to_lowercase(), Duration::from_secs(*secs)))
                .collect(),
        }
    }

    /// Explicit table, mostly for tests.
    pub fn new<I>(default: Duration, per_class: I) -> Self
    where
        I: IntoIterator<Item = (String, Duration)>,
    {
        Self {
            default,
            per_class: per_class
                .into_iter()
                .map(|(c, d)| (c.to_lowercase(), d))
                .collect(),
        }
    }

    /// Budget for `job_class`, falling back to the default.
    pub fn budget(&self, job_class: &str) -> Duration {
        self.per_class
            .get(&job_class.to_lowercase())
            .copied()
            .unwrap_or(self.default)
    }
}

/// Periodic timeout enforcement over a worker board.
pub struct TimeoutSupervisor {
    table: TimeoutTable,
    board: Arc<WorkerBoard>,
}

impl TimeoutSupervisor {
    /// Supervise `board` with `table`.
    pub const fn new(table: TimeoutTable, board: Arc<WorkerBoard>) -> Self {
        Self { table, board }
    }

    /// Budget table.
    pub const fn table(&self) -> &TimeoutTable {
        &self.table
    }

    /// Run one check now.
    pub fn tick(&self) -> Vec<TimedOutWorker> {
        self.tick_at(Instant::now())
    }

    /// Run one check as of `now`.
    pub fn tick_at(&self, now: Instant) -> Vec<TimedOutWorker> {
        let overdue = self
            .board
            .cancel_overdue(now, |class| self.table.budget(class));
        for worker in &overdue {
            tracing::warn!(
                worker_id = worker.worker_id,
                title = %worker.title,
                job_class = %worker.job_class,
                elapsed_secs = worker.elapsed.as_secs(),
                "job exceeded its timeout, cancelling worker"
            );
        }
        overdue
    }
}
