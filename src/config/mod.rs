//! Configuration models for lanes, backends, timeouts and escalation.

pub mod scheduler;

pub use scheduler::{
    BackendConfig, EscalationConfig, HealthConfig, IntervalsConfig, LanePolicyConfig, PathsConfig,
    SchedulerConfig, ThrottleConfig, TierConfig, TimeoutConfig,
};
