//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use prometheus_lane_scheduler::config::SchedulerConfig;
use prometheus_lane_scheduler::core::{
    BackendEndpoint, HealthProbe, ImplementError, Implementer, Job, PoolStats, Scheduler,
};

/// Config pointing every file into `dir`, with short loop periods.
pub fn test_config(dir: &Path, workers: usize) -> SchedulerConfig {
    let mut cfg = SchedulerConfig::default();
    cfg.worker_count = workers;
    cfg.paths.job_store = dir.join("jobs.json");
    cfg.paths.learning_db = dir.join("fix_database.json");
    cfg.paths.status_file = dir.join("status.json");
    cfg.paths.inbox_dir = None;
    cfg.paths.audit_log = None;
    cfg.intervals.change_poll_ms = 50;
    cfg.intervals.supervisor_tick_ms = 50;
    cfg.intervals.status_write_ms = 200;
    cfg.intervals.idle_wait_ms = 20;
    cfg.intervals.full_rescan_ms = 60_000;
    cfg.intervals.inbox_poll_ms = 50;
    cfg.health.probe_interval_ms = 60_000;
    cfg.throttle.defer_delay_ms = 50;
    cfg
}

/// Behaviour of one scripted title.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// How long each run takes.
    pub run_for: Duration,
    /// Error returned by the first `fail_times` runs.
    pub fail_with: Option<String>,
    /// Number of runs that fail (or hang when `hang` is set).
    pub fail_times: usize,
    /// Hang the first `fail_times` runs instead of failing.
    pub hang: bool,
}

/// Implementer driven by per-title scripts. Unscripted titles succeed
/// immediately.
#[derive(Clone, Default)]
pub struct ScriptedImplementer {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    runs: Arc<Mutex<HashMap<String, usize>>>,
    /// Title and backend of every run start, in order.
    pub started: Arc<Mutex<Vec<(String, Option<String>)>>>,
    /// Titles of every successful run, in order.
    pub finished: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    /// Highest concurrent run count seen.
    pub max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedImplementer {
    pub fn script(&self, title: &str, script: Script) {
        self.scripts.lock().insert(title.to_string(), script);
    }

    pub fn runs(&self, title: &str) -> usize {
        self.runs.lock().get(title).copied().unwrap_or(0)
    }

    pub fn started_titles(&self) -> Vec<String> {
        self.started.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn finished_titles(&self) -> Vec<String> {
        self.finished.lock().clone()
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Implementer for ScriptedImplementer {
    async fn implement(
        &self,
        job: &Job,
        backend: Option<&BackendEndpoint>,
    ) -> Result<String, ImplementError> {
        let run = {
            let mut runs = self.runs.lock();
            let n = runs.entry(job.title.clone()).or_default();
            *n += 1;
            *n
        };
        self.started
            .lock()
            .push((job.title.clone(), backend.map(|b| b.name.clone())));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(Arc::clone(&self.in_flight));

        let script = self.scripts.lock().get(&job.title).cloned().unwrap_or_default();
        if run <= script.fail_times && script.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        tokio::time::sleep(script.run_for).await;
        if run <= script.fail_times {
            if let Some(err) = &script.fail_with {
                return Err(ImplementError::from_message(err));
            }
        }
        self.finished.lock().push(job.title.clone());
        Ok(format!("artifacts/{}", job.title))
    }
}

/// Probe answering from a per-address switch; unknown addresses are down.
#[derive(Clone, Default)]
pub struct SwitchProbe {
    up: Arc<Mutex<HashMap<String, bool>>>,
    /// Number of probe calls.
    pub calls: Arc<AtomicUsize>,
}

impl SwitchProbe {
    pub fn set(&self, address: &str, up: bool) {
        self.up.lock().insert(address.to_string(), up);
    }
}

#[async_trait]
impl HealthProbe for SwitchProbe {
    async fn probe(&self, address: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.up.lock().get(address).copied().unwrap_or(false)
    }
}

/// Probe that never answers.
pub struct DownProbe;

#[async_trait]
impl HealthProbe for DownProbe {
    async fn probe(&self, _address: &str) -> bool {
        false
    }
}

/// Poll `cond` every 20 ms until it holds or `limit` passes.
pub async fn wait_until<F>(limit: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait until the scheduler has completed `n` jobs.
pub async fn wait_completed(scheduler: &Scheduler, n: u64, limit: Duration) -> PoolStats {
    wait_until(limit, || scheduler.stats().completed >= n).await;
    scheduler.stats()
}

/// Plain python job.
pub fn py(title: &str) -> Job {
    Job::new(title, "python", serde_json::json!({"task": title}))
}
