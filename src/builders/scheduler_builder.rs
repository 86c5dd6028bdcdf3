//! Builder to construct a [`Scheduler`] from configuration.

use std::sync::Arc;

use anyhow::{anyhow, Context};

use crate::config::SchedulerConfig;
use crate::core::{
    AppResult, AuditSink, ClassPolicy, HealthProbe, Implementer, InMemoryAuditSink, LaneClassifier,
    Scheduler, SchedulerParts,
};
use crate::infra::{JsonlAuditSink, TcpProbe};

/// Events kept by the default in-memory sink when no audit log is configured.
pub const DEFAULT_AUDIT_BUFFER: usize = 1024;

/// Builder for a scheduler and its collaborators.
///
/// Only the implementer is mandatory. The probe defaults to a TCP connect
/// probe with the configured timeout, the audit sink to the configured JSONL
/// log (or a bounded in-memory buffer), and the classifier to the configured
/// lane policy.
pub struct SchedulerBuilder {
    cfg: SchedulerConfig,
    implementer: Option<Arc<dyn Implementer>>,
    probe: Option<Arc<dyn HealthProbe>>,
    audit: Option<Box<dyn AuditSink>>,
    classifier: Option<Box<dyn LaneClassifier>>,
}

impl SchedulerBuilder {
    /// Start from `cfg`.
    #[must_use]
    pub fn new(cfg: SchedulerConfig) -> Self {
        Self {
            cfg,
            implementer: None,
            probe: None,
            audit: None,
            classifier: None,
        }
    }

    /// Configuration the scheduler will use.
    pub const fn config(&self) -> &SchedulerConfig {
        &self.cfg
    }

    /// Set the implementation collaborator.
    #[must_use]
    pub fn implementer(mut self, implementer: impl Implementer) -> Self {
        self.implementer = Some(Arc::new(implementer));
        self
    }

    /// Set the health probe.
    #[must_use]
    pub fn probe(mut self, probe: impl HealthProbe) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    /// Set the audit sink.
    #[must_use]
    pub fn audit_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.audit = Some(Box::new(sink));
        self
    }

    /// Replace the lane classification policy.
    #[must_use]
    pub fn classifier(mut self, classifier: impl LaneClassifier + 'static) -> Self {
        self.classifier = Some(Box::new(classifier));
        self
    }

    /// Build the scheduler.
    ///
    /// # Errors
    ///
    /// Fails when no implementer was set, the configuration is invalid, or
    /// the configured audit log cannot be opened.
    pub fn build(self) -> AppResult<Scheduler> {
        self.cfg
            .validate()
            .map_err(|e| anyhow!("config invalid: {e}"))?;
        let implementer = self
            .implementer
            .ok_or_else(|| anyhow!("an implementer is required"))?;
        let probe: Arc<dyn HealthProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(TcpProbe::new(self.cfg.health.probe_timeout())),
        };
        let audit: Box<dyn AuditSink> = match (self.audit, &self.cfg.paths.audit_log) {
            (Some(sink), _) => sink,
            (None, Some(path)) => Box::new(
                JsonlAuditSink::open(path)
                    .with_context(|| format!("opening audit log {}", path.display()))?,
            ),
            (None, None) => Box::new(InMemoryAuditSink::new(DEFAULT_AUDIT_BUFFER)),
        };
        let classifier: Box<dyn LaneClassifier> = match self.classifier {
            Some(classifier) => classifier,
            None => Box::new(ClassPolicy::from_config(&self.cfg.lanes)),
        };
        let scheduler = Scheduler::new(
            self.cfg,
            SchedulerParts {
                implementer,
                probe,
                audit,
                classifier,
            },
        )?;
        Ok(scheduler)
    }
}

/// Build a scheduler with default collaborators around `implementer`.
///
/// # Errors
///
/// See [`SchedulerBuilder::build`].
pub fn build_scheduler(cfg: SchedulerConfig, implementer: impl Implementer) -> AppResult<Scheduler> {
    SchedulerBuilder::new(cfg).implementer(implementer).build()
}
