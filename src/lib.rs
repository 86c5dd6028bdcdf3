//! # Prometheus Lane Scheduler
//!
//! A local dual-lane job scheduler for build and code-generation workloads.
//!
//! Jobs are JSON descriptors kept in a file-backed job store. The scheduler
//! watches that store, classifies each job into a fast or a slow lane, and
//! dispatches it to a fixed pool of workers. Work that takes too long is
//! cancelled and retried, and jobs that keep failing are escalated into a
//! tiered set of variants informed by a database of fixes that worked before.
//!
//! ## Key Features
//!
//! - **Dual lanes**: fast jobs are dispatched ahead of slow ones; the slow lane
//!   runs one job at a time across every healthy backend
//! - **Crash-safe persistence**: every store rewrite is staged to a temp file
//!   and renamed into place under a file lock
//! - **Health-aware dispatch**: backends are probed periodically and the fast
//!   lane is reprioritized when the primary recovers
//! - **Timeout supervision**: per-class budgets; stuck workers are cancelled
//!   and the job is requeued
//! - **Correlation throttle**: caps concurrent variants of one base project
//! - **Escalation with learning**: recurring failures fan out into tiered
//!   variants, and successful fixes are remembered by failure signature
//!
//! ## Usage
//!
//! ```rust,ignore
//! use prometheus_lane_scheduler::builders::SchedulerBuilder;
//! use prometheus_lane_scheduler::config::SchedulerConfig;
//! use prometheus_lane_scheduler::runtime::CommandImplementer;
//!
//! let cfg = SchedulerConfig::from_file("scheduler.json".as_ref())?;
//! let scheduler = SchedulerBuilder::new(cfg)
//!     .implementer(CommandImplementer::new("./build-job.sh", Vec::<String>::new()))
//!     .build()?;
//! let handle = scheduler.start();
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling model: jobs, lanes, workers, supervision and escalation.
pub mod core;
/// Configuration models for lanes, timeouts, backends and escalation.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// File-backed infrastructure: job store, learning database, status and audit files.
pub mod infra;
/// Runtime adapters connecting the scheduler to external processes.
pub mod runtime;
/// Shared utilities.
pub mod util;
