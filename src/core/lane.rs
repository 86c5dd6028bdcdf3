//! Priority lanes.
//!
//! Each lane is a binary heap ordered by `(priority, sequence)`: lower
//! priority values first, FIFO among equals. The sequence is assigned by the
//! lane at insertion, so re-inserting a job always places it behind its
//! current peers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::core::Job;

/// Which lane a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneKind {
    /// Cheap jobs, always drained first.
    Fast,
    /// Expensive jobs, run one at a time.
    Slow,
}

impl fmt::Display for LaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Slow => write!(f, "slow"),
        }
    }
}

/// Heap entry; ordering is reversed so the max-heap pops the most urgent job.
struct LaneEntry {
    priority: i32,
    sequence: u64,
    job: Job,
}

impl PartialEq for LaneEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for LaneEntry {}

impl PartialOrd for LaneEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LaneEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// A single priority queue of jobs.
pub struct PriorityLane {
    kind: LaneKind,
    next_sequence: u64,
    entries: BinaryHeap<LaneEntry>,
}

impl PriorityLane {
    /// Create an empty lane.
    #[must_use]
    pub const fn new(kind: LaneKind) -> Self {
        Self {
            kind,
            next_sequence: 0,
            entries: BinaryHeap::new(),
        }
    }

    /// Lane identity.
    #[must_use]
    pub const fn kind(&self) -> LaneKind {
        self.kind
    }

    /// Insert a job at `priority`, returning its arrival sequence.
    pub fn push(&mut self, job: Job, priority: i32) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(LaneEntry {
            priority,
            sequence,
            job,
        });
        sequence
    }

    /// Remove the most urgent job.
    pub fn pop(&mut self) -> Option<Job> {
        self.entries.pop().map(|e| e.job)
    }

    /// Remove every job in dequeue order.
    pub fn drain_ordered(&mut self) -> Vec<Job> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some(job) = self.pop() {
            out.push(job);
        }
        out
    }

    /// Drain the lane and re-insert every job at `priority`, keeping their
    /// relative order. Returns how many jobs moved.
    pub fn reprioritize(&mut self, priority: i32) -> usize {
        let drained = self.drain_ordered();
        let moved = drained.len();
        for mut job in drained {
            job.priority = priority;
            self.push(job, priority);
        }
        moved
    }

    /// Current depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no jobs are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Titles currently queued, in no particular order.
    pub fn titles(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.job.title.clone()).collect()
    }

    /// Copies of the queued jobs in dequeue order.
    pub fn ordered_jobs(&self) -> Vec<Job> {
        let mut entries: Vec<&LaneEntry> = self.entries.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|e| e.job.clone()).collect()
    }
}

/// The fast and slow lanes plus the wake signal idle workers wait on.
///
/// The two lanes are guarded independently; only the wake signal is shared.
pub struct Lanes {
    fast: Mutex<PriorityLane>,
    slow: Mutex<PriorityLane>,
    wake: Notify,
}

impl Default for Lanes {
    fn default() -> Self {
        Self::new()
    }
}

impl Lanes {
    /// Create empty lanes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fast: Mutex::new(PriorityLane::new(LaneKind::Fast)),
            slow: Mutex::new(PriorityLane::new(LaneKind::Slow)),
            wake: Notify::new(),
        }
    }

    const fn lane(&self, kind: LaneKind) -> &Mutex<PriorityLane> {
        match kind {
            LaneKind::Fast => &self.fast,
            LaneKind::Slow => &self.slow,
        }
    }

    /// Enqueue a job at its own priority and wake idle workers.
    pub fn push(&self, kind: LaneKind, job: Job) -> u64 {
        let priority = job.priority;
        let sequence = self.lane(kind).lock().push(job, priority);
        self.wake.notify_waiters();
        sequence
    }

    /// Non-blocking dequeue, fast lane first.
    pub fn try_next(&self) -> Option<(LaneKind, Job)> {
        if let Some(job) = self.fast.lock().pop() {
            return Some((LaneKind::Fast, job));
        }
        self.slow.lock().pop().map(|job| (LaneKind::Slow, job))
    }

    /// Dequeue, waiting at most `idle_wait` for an arrival when both lanes
    /// are empty. Returns `None` on timeout or cancellation.
    pub async fn next(
        &self,
        idle_wait: Duration,
        cancel: &CancellationToken,
    ) -> Option<(LaneKind, Job)> {
        let notified = self.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(found) = self.try_next() {
            return Some(found);
        }

        tokio::select! {
            () = &mut notified => {}
            () = tokio::time::sleep(idle_wait) => {}
            () = cancel.cancelled() => return None,
        }
        self.try_next()
    }

    /// Re-insert every fast-lane job at `priority`. Returns the titles that
    /// moved, in their new dequeue order.
    pub fn reprioritize_fast(&self, priority: i32) -> Vec<String> {
        let moved = {
            let mut fast = self.fast.lock();
            fast.reprioritize(priority);
            fast.ordered_jobs()
        };
        if !moved.is_empty() {
            self.wake.notify_waiters();
        }
        moved.into_iter().map(|j| j.title).collect()
    }

    /// Copies of one lane's jobs in dequeue order.
    pub fn snapshot(&self, kind: LaneKind) -> Vec<Job> {
        self.lane(kind).lock().ordered_jobs()
    }

    /// Depth of one lane.
    pub fn depth(&self, kind: LaneKind) -> usize {
        self.lane(kind).lock().len()
    }

    /// Titles queued in either lane.
    pub fn queued_titles(&self) -> Vec<String> {
        let mut titles = self.fast.lock().titles();
        titles.extend(self.slow.lock().titles());
        titles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn job(title: &str, priority: i32) -> Job {
        Job::new(title, "python", Value::Null).with_priority(priority)
    }

    #[test]
    fn test_priority_ordering() {
        let mut lane = PriorityLane::new(LaneKind::Fast);
        lane.push(job("low", 9), 9);
        lane.push(job("urgent", 0), 0);
        lane.push(job("normal", 5), 5);

        assert_eq!(lane.pop().unwrap().title, "urgent");
        assert_eq!(lane.pop().unwrap().title, "normal");
        assert_eq!(lane.pop().unwrap().title, "low");
        assert!(lane.pop().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut lane = PriorityLane::new(LaneKind::Fast);
        for t in ["a", "b", "c"] {
            lane.push(job(t, 5), 5);
        }
        let order: Vec<_> = lane.drain_ordered().into_iter().map(|j| j.title).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sequence_is_lane_owned() {
        let mut lane = PriorityLane::new(LaneKind::Slow);
        assert_eq!(lane.push(job("a", 5), 5), 0);
        assert_eq!(lane.push(job("b", 5), 5), 1);
        let mut other = PriorityLane::new(LaneKind::Fast);
        assert_eq!(other.push(job("c", 5), 5), 0);
    }

    #[test]
    fn test_reprioritize_keeps_order_and_count() {
        let mut lane = PriorityLane::new(LaneKind::Fast);
        lane.push(job("a", 7), 7);
        lane.push(job("b", 5), 5);
        lane.push(job("c", 5), 5);
        assert_eq!(lane.reprioritize(0), 3);
        assert_eq!(lane.len(), 3);
        let drained = lane.drain_ordered();
        let titles: Vec<_> = drained.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["b", "c", "a"]);
        assert!(drained.iter().all(|j| j.priority == 0));
    }

    #[test]
    fn test_fast_lane_checked_first() {
        let lanes = Lanes::new();
        lanes.push(LaneKind::Slow, job("slow-urgent", 0));
        lanes.push(LaneKind::Fast, job("fast-lazy", 9));
        let (kind, first) = lanes.try_next().unwrap();
        assert_eq!(kind, LaneKind::Fast);
        assert_eq!(first.title, "fast-lazy");
        let (kind, second) = lanes.try_next().unwrap();
        assert_eq!(kind, LaneKind::Slow);
        assert_eq!(second.title, "slow-urgent");
    }

    #[test]
    fn test_reprioritize_fast_leaves_slow_alone() {
        let lanes = Lanes::new();
        lanes.push(LaneKind::Fast, job("a", 5));
        lanes.push(LaneKind::Fast, job("b", 3));
        lanes.push(LaneKind::Slow, job("s", 5));
        assert_eq!(lanes.reprioritize_fast(0), vec!["b", "a"]);
        assert!(lanes.snapshot(LaneKind::Fast).iter().all(|j| j.priority == 0));
        assert_eq!(lanes.snapshot(LaneKind::Slow)[0].priority, 5);
    }

    #[tokio::test]
    async fn test_next_times_out_when_empty() {
        let lanes = Lanes::new();
        let cancel = CancellationToken::new();
        let got = lanes.next(Duration::from_millis(20), &cancel).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_next_wakes_on_push() {
        let lanes = std::sync::Arc::new(Lanes::new());
        let cancel = CancellationToken::new();
        let waiter = {
            let lanes = std::sync::Arc::clone(&lanes);
            let cancel = cancel.clone();
            tokio::spawn(async move { lanes.next(Duration::from_secs(5), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        lanes.push(LaneKind::Fast, job("arrival", 5));
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.unwrap().1.title, "arrival");
    }

    #[tokio::test]
    async fn test_next_returns_none_on_cancel() {
        let lanes = Lanes::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(lanes.next(Duration::from_secs(5), &cancel).await.is_none());
    }
}
