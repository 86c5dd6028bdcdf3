//! Core scheduling model: jobs, lanes, workers, supervision and escalation.

pub mod audit;
pub mod classifier;
pub mod error;
pub mod escalation;
pub mod executor;
pub mod health;
pub mod job;
pub mod lane;
pub mod scheduler;
pub mod supervisor;
pub mod throttle;
pub mod worker_pool;

pub use audit::{
    build_audit_event, build_title_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink,
};
pub use classifier::{ClassPolicy, LaneClassifier};
pub use error::{AppResult, ImplementError, SchedulerError};
pub use escalation::{EscalationEngine, EscalationPlan, FailureSignature, SignatureNormalizer};
pub use executor::{BlockingImplementer, HealthProbe, Implementer};
pub use health::{BackendEndpoint, BackendHealth, HealthChange, HealthState};
pub use job::{EscalationContext, Job, JobOutcome, DEFAULT_JOB_CLASS, DEFAULT_PRIORITY};
pub use lane::{LaneKind, Lanes, PriorityLane};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerParts, RECOVERY_PRIORITY};
pub use supervisor::{TimeoutSupervisor, TimeoutTable};
pub use throttle::{CorrelationThrottle, ThrottlePermit};
pub use worker_pool::{PoolStats, TimedOutWorker, WorkerBoard, WorkerSlot, WorkerStatus};
