//! Collaborator traits: the implementation backend and the health probe.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{BackendEndpoint, ImplementError, Job};

/// Abstraction for the code-generation/build collaborator.
///
/// The scheduler drops the returned future when the timeout supervisor
/// cancels a worker, so implementations should hold resources in RAII guards
/// (for example a child process with `kill_on_drop`). Calls may be retried
/// and should be idempotent enough to tolerate it.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_lane_scheduler::core::{BackendEndpoint, ImplementError, Implementer, Job};
///
/// #[derive(Clone)]
/// struct EchoImplementer;
///
/// #[async_trait]
/// impl Implementer for EchoImplementer {
///     async fn implement(
///         &self,
///         job: &Job,
///         _backend: Option<&BackendEndpoint>,
///     ) -> Result<String, ImplementError> {
///         Ok(format!("out/{}", job.title))
///     }
/// }
/// ```
#[async_trait]
pub trait Implementer: Send + Sync + 'static {
    /// Run `job` against `backend` and return the artifact location.
    async fn implement(
        &self,
        job: &Job,
        backend: Option<&BackendEndpoint>,
    ) -> Result<String, ImplementError>;
}

#[async_trait]
impl<T: Implementer + ?Sized> Implementer for Arc<T> {
    async fn implement(
        &self,
        job: &Job,
        backend: Option<&BackendEndpoint>,
    ) -> Result<String, ImplementError> {
        (**self).implement(job, backend).await
    }
}

/// Reachability check used by the health monitor.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    /// Return true if `address` answers. Must never panic and must apply its
    /// own short timeout.
    async fn probe(&self, address: &str) -> bool;
}

#[async_trait]
impl<T: HealthProbe + ?Sized> HealthProbe for Arc<T> {
    async fn probe(&self, address: &str) -> bool {
        (**self).probe(address).await
    }
}

/// Adapter running a synchronous collaborator on tokio's blocking pool so it
/// never stalls the dispatch loop.
///
/// Cancellation only abandons the result; the blocking call itself runs to
/// completion in the background.
pub struct BlockingImplementer<F> {
    func: Arc<F>,
}

impl<F> BlockingImplementer<F>
where
    F: Fn(&Job, Option<&BackendEndpoint>) -> Result<String, ImplementError>
        + Send
        + Sync
        + 'static,
{
    /// Wrap a blocking function.
    pub fn new(func: F) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl<F> Implementer for BlockingImplementer<F>
where
    F: Fn(&Job, Option<&BackendEndpoint>) -> Result<String, ImplementError>
        + Send
        + Sync
        + 'static,
{
    async fn implement(
        &self,
        job: &Job,
        backend: Option<&BackendEndpoint>,
    ) -> Result<String, ImplementError> {
        let func = Arc::clone(&self.func);
        let job = job.clone();
        let backend = backend.cloned();
        tokio::task::spawn_blocking(move || func(&job, backend.as_ref()))
            .await
            .map_err(|e| ImplementError::new("JoinError", e.to_string()))?
    }
}
