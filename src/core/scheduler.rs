//! The scheduler aggregate.
//!
//! [`Scheduler`] owns every piece of shared state (lanes, worker board,
//! throttle, backend health, live-title registry) and runs the worker loops
//! plus the independent periodic loops: change polling, inbox sweeping, health
//! probing, timeout supervision, status writing and backlog recovery.
//!
//! All file I/O goes through `spawn_blocking` so that a slow disk never stalls
//! dispatch.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::core::audit::{build_audit_event, build_title_event, AuditAction, AuditEvent, AuditSink};
use crate::core::classifier::LaneClassifier;
use crate::core::escalation::{EscalationEngine, EscalationPlan};
use crate::core::health::{BackendHealth, HealthChange};
use crate::core::supervisor::{TimeoutSupervisor, TimeoutTable};
use crate::core::throttle::{CorrelationThrottle, ThrottlePermit};
use crate::core::worker_pool::{PoolCounters, PoolStats, TimedOutWorker, WorkerBoard};
use crate::core::{
    BackendEndpoint, HealthProbe, ImplementError, Implementer, Job, JobOutcome, LaneKind, Lanes,
    SchedulerError,
};
use crate::infra::{ChangeDetector, Inbox, JobStore, LearningDb, StatusFile, StatusSnapshot};
use crate::util::clock::{now_ms, now_secs_f64};

/// Priority fast-lane jobs are moved to when the primary backend recovers.
pub const RECOVERY_PRIORITY: i32 = 0;

/// Collaborators handed to [`Scheduler::new`].
pub struct SchedulerParts {
    /// Runs jobs.
    pub implementer: Arc<dyn Implementer>,
    /// Checks backend reachability.
    pub probe: Arc<dyn HealthProbe>,
    /// Receives lifecycle events.
    pub audit: Box<dyn AuditSink>,
    /// Routes jobs to lanes.
    pub classifier: Box<dyn LaneClassifier>,
}

struct Inner {
    cfg: SchedulerConfig,
    instance_id: Uuid,
    lanes: Lanes,
    classifier: Box<dyn LaneClassifier>,
    throttle: CorrelationThrottle,
    health: BackendHealth,
    board: Arc<WorkerBoard>,
    supervisor: TimeoutSupervisor,
    escalation: EscalationEngine,
    store: JobStore,
    detector: Mutex<ChangeDetector>,
    inbox: Option<Inbox>,
    status_file: StatusFile,
    implementer: Arc<dyn Implementer>,
    probe: Arc<dyn HealthProbe>,
    audit: Mutex<Box<dyn AuditSink>>,
    /// Titles queued in a lane, deferred, or running.
    live: Mutex<HashSet<String>>,
    slow_gate: tokio::sync::Mutex<()>,
    counters: PoolCounters,
    backlog_since: Mutex<Option<Instant>>,
    shutdown: CancellationToken,
}

/// Cheaply cloneable handle to the scheduler state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Running background tasks of a started scheduler.
pub struct SchedulerHandle {
    scheduler: Scheduler,
    tasks: JoinSet<()>,
}

impl Scheduler {
    /// Assemble a scheduler. Nothing runs until [`Scheduler::start`].
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Config` if the configuration is invalid.
    pub fn new(cfg: SchedulerConfig, parts: SchedulerParts) -> Result<Self, SchedulerError> {
        cfg.validate().map_err(SchedulerError::Config)?;
        let board = Arc::new(WorkerBoard::new(cfg.worker_count));
        let supervisor =
            TimeoutSupervisor::new(TimeoutTable::from_config(&cfg.timeouts), Arc::clone(&board));
        let escalation = EscalationEngine::new(
            cfg.escalation.clone(),
            LearningDb::new(&cfg.paths.learning_db),
        )?;
        let store = JobStore::new(&cfg.paths.job_store);
        let inner = Inner {
            instance_id: Uuid::new_v4(),
            lanes: Lanes::new(),
            classifier: parts.classifier,
            throttle: CorrelationThrottle::new(cfg.throttle.max_per_base_project),
            health: BackendHealth::from_config(&cfg.health),
            board,
            supervisor,
            escalation,
            detector: Mutex::new(ChangeDetector::new(store.clone())),
            store,
            inbox: cfg.paths.inbox_dir.as_ref().map(Inbox::new),
            status_file: StatusFile::new(&cfg.paths.status_file),
            implementer: parts.implementer,
            probe: parts.probe,
            audit: Mutex::new(parts.audit),
            live: Mutex::new(HashSet::new()),
            slow_gate: tokio::sync::Mutex::new(()),
            counters: PoolCounters::default(),
            backlog_since: Mutex::new(None),
            shutdown: CancellationToken::new(),
            cfg,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.cfg
    }

    /// Identity written into status snapshots.
    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    /// Priority lanes.
    pub fn lanes(&self) -> &Lanes {
        &self.inner.lanes
    }

    /// Worker status board.
    pub fn board(&self) -> &WorkerBoard {
        &self.inner.board
    }

    /// Backend health table.
    pub fn health(&self) -> &BackendHealth {
        &self.inner.health
    }

    /// Correlation throttle.
    pub fn throttle(&self) -> &CorrelationThrottle {
        &self.inner.throttle
    }

    /// Job store.
    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }

    /// Escalation engine.
    pub fn escalation(&self) -> &EscalationEngine {
        &self.inner.escalation
    }

    /// Throughput counters.
    pub fn stats(&self) -> PoolStats {
        self.inner.counters.snapshot()
    }

    /// True if `title` is queued, deferred or running.
    pub fn is_live(&self, title: &str) -> bool {
        self.inner.live.lock().contains(title)
    }

    /// Token cancelled on shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Request shutdown. Running jobs are cancelled and stay in the store.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn audit(&self, event: AuditEvent) {
        self.inner.audit.lock().record(event);
    }

    // ----- admission ------------------------------------------------------

    /// Admit a job into its lane unless its title is already live. Returns
    /// the lane it went to.
    pub fn enqueue(&self, job: Job) -> Option<LaneKind> {
        if let Err(e) = job.validate() {
            tracing::warn!(title = %job.title, error = %e, "dropping invalid job");
            self.audit(build_audit_event(AuditAction::Dropped, &job).with_detail(e.to_string()));
            return None;
        }
        if !self.inner.live.lock().insert(job.title.clone()) {
            return None;
        }
        let lane = self.inner.classifier.classify(&job);
        tracing::info!(
            title = %job.title,
            job_class = %job.job_class,
            lane = %lane,
            priority = job.priority,
            "job enqueued"
        );
        self.audit(build_audit_event(AuditAction::Enqueued, &job).in_lane(lane));
        self.inner.lanes.push(lane, job);
        Some(lane)
    }

    /// Persist a job and admit it. A title already in the store is left as
    /// stored and `None` is returned.
    ///
    /// # Errors
    ///
    /// Returns the store error if the job cannot be persisted, or
    /// `SchedulerError::Cancelled` after shutdown.
    pub async fn submit(&self, job: Job) -> Result<Option<LaneKind>, SchedulerError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }
        job.validate()?;
        let inner = Arc::clone(&self.inner);
        let stored = job.clone();
        let added = blocking(move || inner.store.insert_new(vec![stored])).await?;
        if added.is_empty() {
            tracing::debug!(title = %job.title, "title already stored, not resubmitted");
            return Ok(None);
        }
        Ok(self.enqueue(job))
    }

    /// Poll the store for new entries and admit them. Returns how many were
    /// admitted.
    ///
    /// # Errors
    ///
    /// Returns the store error if the file cannot be read.
    pub async fn sync_store(&self) -> Result<usize, SchedulerError> {
        let scheduler = self.clone();
        let Some((admitted, rejected)) = blocking(move || {
            // Admission happens under the detector lock so a concurrent prune
            // cannot release a title between the read and the enqueue.
            let mut detector = scheduler.inner.detector.lock();
            let Some(snapshot) = detector.poll_snapshot()? else {
                return Ok(None);
            };
            let admitted = scheduler.admit(snapshot.jobs);
            Ok(Some((admitted, snapshot.rejected)))
        })
        .await? else {
            return Ok(0);
        };
        if !rejected.is_empty() {
            for entry in &rejected {
                self.audit(
                    build_title_event(
                        AuditAction::Dropped,
                        entry.title.clone().unwrap_or_else(|| "<untitled>".into()),
                    )
                    .with_detail(entry.reason.clone()),
                );
            }
            let inner = Arc::clone(&self.inner);
            blocking(move || inner.store.atomic_update(|jobs| jobs)).await?;
        }
        Ok(admitted)
    }

    fn admit(&self, jobs: Vec<Job>) -> usize {
        jobs.into_iter().filter_map(|job| self.enqueue(job)).count()
    }

    /// Re-read the whole store, ignoring the change marker, and admit every
    /// entry that is not already live.
    ///
    /// # Errors
    ///
    /// Returns the store error if the file cannot be read.
    pub async fn rescan(&self) -> Result<usize, SchedulerError> {
        let scheduler = self.clone();
        let admitted = blocking(move || {
            let mut detector = scheduler.inner.detector.lock();
            let jobs = detector.force_rescan()?;
            Ok(scheduler.admit(jobs))
        })
        .await?;
        if admitted > 0 {
            tracing::info!(admitted, "full rescan admitted jobs");
        }
        Ok(admitted)
    }

    /// Merge inbox files into the store, then admit what arrived.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the inbox or store cannot be accessed.
    pub async fn sweep_inbox(&self) -> Result<usize, SchedulerError> {
        let Some(inbox) = self.inner.inbox.clone() else {
            return Ok(0);
        };
        let store = self.inner.store.clone();
        let report = blocking(move || inbox.sweep(&store)).await?;
        for (path, reason) in &report.invalid {
            self.audit(
                build_title_event(AuditAction::Dropped, path.display().to_string())
                    .with_detail(reason.clone()),
            );
        }
        if report.accepted.is_empty() {
            return Ok(0);
        }
        self.sync_store().await
    }

    // ----- health ---------------------------------------------------------

    /// Probe every backend once. A primary recovery reprioritizes the fast
    /// lane.
    pub async fn probe_backends(&self) -> Vec<HealthChange> {
        let changes = self.inner.health.probe_all(self.inner.probe.as_ref()).await;
        if changes.contains(&HealthChange::PrimaryRecovered) {
            self.reprioritize_fast_lane();
        }
        changes
    }

    /// Move every queued fast-lane job to [`RECOVERY_PRIORITY`].
    pub fn reprioritize_fast_lane(&self) -> usize {
        let moved = self.inner.lanes.reprioritize_fast(RECOVERY_PRIORITY);
        if !moved.is_empty() {
            tracing::info!(count = moved.len(), "primary backend recovered, fast lane reprioritized");
        }
        for title in &moved {
            self.audit(
                build_title_event(AuditAction::Reprioritized, title.clone())
                    .in_lane(LaneKind::Fast)
                    .with_detail(format!("priority {RECOVERY_PRIORITY}")),
            );
        }
        moved.len()
    }

    // ----- supervision ----------------------------------------------------

    /// Run one timeout check. Cancelled workers requeue or prune their job
    /// themselves.
    pub fn supervise(&self) -> Vec<TimedOutWorker> {
        let overdue = self.inner.supervisor.tick();
        for worker in &overdue {
            PoolCounters::bump(&self.inner.counters.timed_out);
            self.audit(
                build_title_event(AuditAction::TimedOut, worker.title.clone())
                    .on_worker(worker.worker_id)
                    .with_detail(format!("after {}s", worker.elapsed.as_secs())),
            );
        }
        overdue
    }

    /// Force a rescan once every worker has been idle with unqueued store
    /// entries for longer than the stuck threshold. Returns true when a
    /// rescan ran.
    ///
    /// # Errors
    ///
    /// Returns the store error if the file cannot be read.
    pub async fn recover_backlog(&self) -> Result<bool, SchedulerError> {
        if self.inner.board.working() > 0 {
            *self.inner.backlog_since.lock() = None;
            return Ok(false);
        }
        let inner = Arc::clone(&self.inner);
        let stored = blocking(move || inner.store.load()).await?;
        let queued: HashSet<String> = self.inner.lanes.queued_titles().into_iter().collect();
        if stored.iter().all(|j| queued.contains(&j.title)) {
            *self.inner.backlog_since.lock() = None;
            return Ok(false);
        }
        let threshold = Duration::from_millis(self.inner.cfg.intervals.stuck_threshold_ms);
        let stuck_for = {
            let mut since = self.inner.backlog_since.lock();
            since.get_or_insert_with(Instant::now).elapsed()
        };
        if stuck_for < threshold {
            return Ok(false);
        }
        tracing::warn!(
            stuck_secs = stuck_for.as_secs(),
            "workers idle with unqueued backlog, forcing rescan"
        );
        *self.inner.backlog_since.lock() = None;
        self.rescan().await?;
        Ok(true)
    }

    // ----- status ---------------------------------------------------------

    /// Current status snapshot.
    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            timestamp: now_secs_f64(),
            instance_id: self.inner.instance_id,
            fast_depth: self.inner.lanes.depth(LaneKind::Fast),
            slow_depth: self.inner.lanes.depth(LaneKind::Slow),
            workers: self.inner.board.snapshot(),
            backends: self.inner.health.endpoints(),
            preferred_backend: self.inner.health.preferred(),
            throttle: self.inner.throttle.snapshot().into_iter().collect(),
            stats: self.stats(),
        }
    }

    /// Write the status snapshot file.
    ///
    /// # Errors
    ///
    /// Returns the write error.
    pub async fn write_status(&self) -> Result<(), SchedulerError> {
        let snapshot = self.status_snapshot();
        let file = self.inner.status_file.clone();
        blocking(move || file.write(&snapshot)).await
    }

    // ----- workers --------------------------------------------------------

    async fn worker_loop(self, worker_id: usize) {
        let idle_wait = Duration::from_millis(self.inner.cfg.intervals.idle_wait_ms);
        let shutdown = self.inner.shutdown.clone();
        tracing::debug!(worker_id, "worker started");
        while !shutdown.is_cancelled() {
            let Some((lane, job)) = self.inner.lanes.next(idle_wait, &shutdown).await else {
                continue;
            };
            let Some(permit) = self.inner.throttle.try_acquire(job.correlation_key()) else {
                self.defer(worker_id, lane, job).await;
                continue;
            };
            self.process(worker_id, lane, job, permit).await;
        }
        tracing::debug!(worker_id, "worker stopped");
    }

    async fn defer(&self, worker_id: usize, lane: LaneKind, job: Job) {
        PoolCounters::bump(&self.inner.counters.deferred);
        tracing::warn!(
            worker_id,
            title = %job.title,
            base_project = job.correlation_key().unwrap_or_default(),
            "base project saturated, deferring job"
        );
        self.audit(
            build_audit_event(AuditAction::Deferred, &job)
                .in_lane(lane)
                .on_worker(worker_id),
        );
        let delay = Duration::from_millis(self.inner.cfg.throttle.defer_delay_ms);
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = self.inner.shutdown.cancelled() => {}
        }
        self.inner.lanes.push(lane, job);
    }

    async fn process(&self, worker_id: usize, lane: LaneKind, job: Job, permit: ThrottlePermit) {
        let _slow_guard = match lane {
            LaneKind::Fast => None,
            LaneKind::Slow => {
                tokio::select! {
                    guard = self.inner.slow_gate.lock() => Some(guard),
                    () = self.inner.shutdown.cancelled() => {
                        self.release(&job.title);
                        return;
                    }
                }
            }
        };

        let backends = self.backends_for(worker_id, lane);
        let first = backends.first().map(|b| b.name.clone());
        let token = self
            .inner
            .board
            .begin(worker_id, &job, lane, first.clone(), &self.inner.shutdown);
        PoolCounters::bump(&self.inner.counters.dispatched);
        tracing::info!(
            worker_id,
            title = %job.title,
            job_class = %job.job_class,
            lane = %lane,
            backend = first.as_deref().unwrap_or("none"),
            attempt = job.attempt_count + 1,
            "job dispatched"
        );
        self.audit(
            build_audit_event(AuditAction::Dispatched, &job)
                .in_lane(lane)
                .on_worker(worker_id),
        );

        let outcome = self.run_variants(worker_id, &job, &backends, &token).await;
        let title = job.title.clone();
        match outcome {
            JobOutcome::Completed { artifact } => self.on_success(worker_id, lane, job, artifact).await,
            JobOutcome::Failed { error_type, message } => {
                self.on_failure(worker_id, lane, job, ImplementError::new(error_type, message))
                    .await;
            }
            JobOutcome::TimedOut if self.inner.shutdown.is_cancelled() => {
                tracing::info!(worker_id, title = %job.title, "job interrupted by shutdown");
                self.release(&job.title);
            }
            JobOutcome::TimedOut => self.on_timeout(worker_id, lane, job).await,
        }
        drop(permit);
        self.inner.board.finish(worker_id, Some(title));
    }

    /// Backends to try, in order. Fast jobs get the worker's assignment; slow
    /// jobs get every healthy configured variant. An empty list means the
    /// collaborator runs once without a pinned backend.
    fn backends_for(&self, worker_id: usize, lane: LaneKind) -> Vec<BackendEndpoint> {
        match lane {
            LaneKind::Fast => self.inner.health.assign(worker_id).into_iter().collect(),
            LaneKind::Slow => {
                let variants: Vec<BackendEndpoint> = self
                    .inner
                    .cfg
                    .lanes
                    .slow_lane_variants
                    .iter()
                    .filter(|name| self.inner.health.is_healthy(name))
                    .filter_map(|name| self.inner.health.endpoint(name))
                    .collect();
                if variants.is_empty() {
                    self.inner.health.assign(worker_id).into_iter().collect()
                } else {
                    variants
                }
            }
        }
    }

    /// Run the job once per backend. Succeeds if any run succeeds; every
    /// backend is still tried so the slow lane gets independent attempts.
    async fn run_variants(
        &self,
        worker_id: usize,
        job: &Job,
        backends: &[BackendEndpoint],
        token: &CancellationToken,
    ) -> JobOutcome {
        let attempts: Vec<Option<&BackendEndpoint>> = if backends.is_empty() {
            vec![None]
        } else {
            backends.iter().map(Some).collect()
        };
        let mut artifact = None;
        let mut last_error = None;
        for (idx, backend) in attempts.into_iter().enumerate() {
            if idx > 0 {
                self.inner
                    .board
                    .next_phase(worker_id, backend.map(|b| b.name.clone()));
            }
            let result = tokio::select! {
                biased;
                () = token.cancelled() => return JobOutcome::TimedOut,
                result = self.inner.implementer.implement(job, backend) => result,
            };
            match result {
                Ok(found) => {
                    artifact.get_or_insert(found);
                }
                Err(e) => {
                    tracing::debug!(
                        worker_id,
                        title = %job.title,
                        backend = backend.map_or("none", |b| b.name.as_str()),
                        error = %e,
                        "variant failed"
                    );
                    last_error = Some(e);
                }
            }
        }
        match (artifact, last_error) {
            (Some(artifact), _) => JobOutcome::Completed { artifact },
            (None, Some(e)) => JobOutcome::Failed {
                error_type: e.error_type,
                message: e.message,
            },
            (None, None) => JobOutcome::Failed {
                error_type: "UnknownError".into(),
                message: "no attempt was made".into(),
            },
        }
    }

    async fn on_success(&self, worker_id: usize, lane: LaneKind, job: Job, artifact: String) {
        PoolCounters::bump(&self.inner.counters.completed);
        tracing::info!(worker_id, title = %job.title, artifact = %artifact, "job completed");
        self.audit(
            build_audit_event(AuditAction::Completed, &job)
                .in_lane(lane)
                .on_worker(worker_id)
                .with_detail(artifact.clone()),
        );
        if job.escalation.is_some() {
            let inner = Arc::clone(&self.inner);
            let learned = job.clone();
            if let Err(e) =
                blocking(move || inner.escalation.record_success(&learned, &artifact)).await
            {
                tracing::error!(title = %job.title, error = %e, "failed to record fix");
            }
        }
        self.prune(&job.title).await;
    }

    async fn on_failure(&self, worker_id: usize, lane: LaneKind, mut job: Job, error: ImplementError) {
        job.record_failure(error.to_string(), now_ms());
        PoolCounters::bump(&self.inner.counters.failed);
        tracing::warn!(
            worker_id,
            title = %job.title,
            job_class = %job.job_class,
            attempt = job.attempt_count,
            error = %error,
            "job failed"
        );
        self.audit(
            build_audit_event(AuditAction::Failed, &job)
                .in_lane(lane)
                .on_worker(worker_id)
                .with_detail(error.to_string()),
        );
        if job.escalation.as_ref().is_some_and(|c| c.proven_fix) {
            let inner = Arc::clone(&self.inner);
            let failed = job.clone();
            if let Err(e) =
                blocking(move || inner.escalation.record_proven_fix_failure(&failed)).await
            {
                tracing::error!(title = %job.title, error = %e, "failed to record fix attempt");
            }
        }

        if !self.inner.escalation.should_escalate(&job) {
            self.requeue(lane, job).await;
            return;
        }

        let inner = Arc::clone(&self.inner);
        let planned = job.clone();
        let plan = blocking(move || Ok(inner.escalation.plan(&planned, &error))).await;
        match plan {
            Ok(EscalationPlan::Exhausted) => {
                self.drop_terminal(&job, "escalation depth exhausted").await;
            }
            Ok(EscalationPlan::Variants(variants)) => self.escalate(job, variants).await,
            Err(e) => {
                tracing::error!(title = %job.title, error = %e, "escalation failed, requeueing");
                self.requeue(lane, job).await;
            }
        }
    }

    async fn escalate(&self, job: Job, variants: Vec<Job>) {
        let inner = Arc::clone(&self.inner);
        let title = job.title.clone();
        let replaced = blocking(move || {
            let mut detector = inner.detector.lock();
            let added = inner.store.replace(&title, variants)?;
            detector.forget(&title);
            Ok(added)
        })
        .await;
        match replaced {
            Ok(added) => {
                PoolCounters::bump(&self.inner.counters.escalated);
                tracing::info!(
                    title = %job.title,
                    level = job.escalation_level + 1,
                    variants = added.len(),
                    "job escalated"
                );
                self.audit(
                    build_audit_event(AuditAction::Escalated, &job)
                        .with_detail(format!("{} variants", added.len())),
                );
                self.release(&job.title);
                if let Err(e) = self.sync_store().await {
                    tracing::warn!(error = %e, "failed to admit escalation variants");
                }
            }
            Err(e) => {
                tracing::error!(title = %job.title, error = %e, "failed to persist escalation");
                self.release(&job.title);
            }
        }
    }

    async fn on_timeout(&self, worker_id: usize, lane: LaneKind, mut job: Job) {
        let budget = self.inner.supervisor.table().budget(&job.job_class);
        job.record_failure(format!("timed out after {}s", budget.as_secs()), now_ms());
        if job.attempt_count >= self.inner.cfg.timeouts.retry_budget {
            self.drop_terminal(&job, "timeout retry budget exhausted").await;
            return;
        }
        tracing::warn!(worker_id, title = %job.title, attempt = job.attempt_count, "requeueing timed out job");
        self.requeue(lane, job).await;
    }

    async fn requeue(&self, lane: LaneKind, job: Job) {
        let inner = Arc::clone(&self.inner);
        let stored = job.clone();
        if let Err(e) = blocking(move || inner.store.append(stored)).await {
            tracing::error!(title = %job.title, error = %e, "failed to persist requeued job");
        }
        PoolCounters::bump(&self.inner.counters.requeued);
        self.audit(
            build_audit_event(AuditAction::Requeued, &job)
                .in_lane(lane)
                .with_detail(format!("attempt {}", job.attempt_count)),
        );
        self.inner.lanes.push(lane, job);
    }

    async fn drop_terminal(&self, job: &Job, reason: &str) {
        PoolCounters::bump(&self.inner.counters.dropped);
        tracing::error!(
            title = %job.title,
            job_class = %job.job_class,
            last_error = job.last_error.as_deref().unwrap_or(""),
            attempts = job.attempt_count,
            escalation_level = job.escalation_level,
            reason,
            "job dropped"
        );
        self.audit(build_audit_event(AuditAction::Dropped, job).with_detail(reason.to_string()));
        self.prune(&job.title).await;
    }

    async fn prune(&self, title: &str) {
        let inner = Arc::clone(&self.inner);
        let owned = title.to_string();
        let pruned = blocking(move || {
            let mut detector = inner.detector.lock();
            inner.store.remove(&owned)?;
            detector.forget(&owned);
            Ok(())
        })
        .await;
        if let Err(e) = pruned {
            tracing::error!(title, error = %e, "failed to prune job from store");
        }
        self.release(title);
    }

    fn release(&self, title: &str) {
        self.inner.live.lock().remove(title);
    }

    // ----- lifecycle ------------------------------------------------------

    /// Spawn the workers and periodic loops on the current tokio runtime.
    #[must_use]
    pub fn start(&self) -> SchedulerHandle {
        let mut tasks = JoinSet::new();
        for worker_id in 0..self.inner.cfg.worker_count {
            tasks.spawn(self.clone().worker_loop(worker_id));
        }
        let intervals = &self.inner.cfg.intervals;
        let ms = Duration::from_millis;

        self.spawn_periodic(&mut tasks, "change-poll", ms(intervals.change_poll_ms), |s| async move {
            if let Err(e) = s.sync_store().await {
                tracing::warn!(error = %e, "change poll failed");
            }
        });
        self.spawn_periodic(&mut tasks, "full-rescan", ms(intervals.full_rescan_ms), |s| async move {
            if let Err(e) = s.rescan().await {
                tracing::warn!(error = %e, "full rescan failed");
            }
        });
        if self.inner.inbox.is_some() {
            self.spawn_periodic(&mut tasks, "inbox", ms(intervals.inbox_poll_ms), |s| async move {
                if let Err(e) = s.sweep_inbox().await {
                    tracing::warn!(error = %e, "inbox sweep failed");
                }
            });
        }
        self.spawn_periodic(&mut tasks, "health", self.inner.cfg.health.probe_interval(), |s| async move {
            s.probe_backends().await;
        });
        self.spawn_periodic(&mut tasks, "supervisor", ms(intervals.supervisor_tick_ms), |s| async move {
            s.supervise();
        });
        self.spawn_periodic(&mut tasks, "backlog", ms(intervals.change_poll_ms), |s| async move {
            if let Err(e) = s.recover_backlog().await {
                tracing::warn!(error = %e, "backlog check failed");
            }
        });
        self.spawn_periodic(&mut tasks, "status", ms(intervals.status_write_ms), |s| async move {
            if let Err(e) = s.write_status().await {
                tracing::warn!(error = %e, "failed to write status snapshot");
            }
        });

        tracing::info!(
            workers = self.inner.cfg.worker_count,
            instance_id = %self.inner.instance_id,
            store = %self.inner.store.path().display(),
            "scheduler started"
        );
        SchedulerHandle {
            scheduler: self.clone(),
            tasks,
        }
    }

    fn spawn_periodic<F, Fut>(&self, tasks: &mut JoinSet<()>, name: &'static str, period: Duration, tick: F)
    where
        F: Fn(Self) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let scheduler = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tasks.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tick(scheduler.clone()).await;
            }
            tracing::debug!(loop_name = name, "loop stopped");
        });
    }

}

impl SchedulerHandle {
    /// Scheduler this handle belongs to.
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Cancel everything, wait for the tasks to finish and write a final
    /// status snapshot.
    pub async fn shutdown(mut self) {
        self.scheduler.shutdown();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "scheduler task panicked");
            }
        }
        if let Err(e) = self.scheduler.write_status().await {
            tracing::warn!(error = %e, "failed to write final status snapshot");
        }
        tracing::info!("scheduler stopped");
    }
}

async fn blocking<T, F>(f: F) -> Result<T, SchedulerError>
where
    F: FnOnce() -> Result<T, SchedulerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SchedulerError::Join(e.to_string()))?
}
