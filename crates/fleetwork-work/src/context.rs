//! Shared controller context and error policy

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::error;

use fleetwork_common::Error;

use crate::client::{HubClient, HubClientImpl, SpokeClient, SpokeClientImpl};
use crate::resolver::{DiscoveryRestMapper, RestMapper};

/// Default interval for periodic resyncs and retryable failures
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Backoff applied by the error policy for ordinary failures
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Context shared by every work controller
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(hub_client, spoke_client, "cluster1")
///     .resync_interval(Duration::from_secs(30))
///     .build();
/// ```
pub struct Context {
    /// Hub operations (trait object for testability)
    pub hub: Arc<dyn HubClient>,
    /// Member-cluster operations (trait object for testability)
    pub spoke: Arc<dyn SpokeClient>,
    /// Kind to resource resolution for the member cluster
    pub mapper: Arc<dyn RestMapper>,
    /// Hub namespace holding this cluster's Works
    pub work_namespace: String,
    /// Periodic resync interval for the applied-work monitor and retries
    pub resync_interval: Duration,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(hub: Client, spoke: Client, work_namespace: impl Into<String>) -> ContextBuilder {
        ContextBuilder::new(hub, spoke, work_namespace.into())
    }

    /// Create a context for testing with custom mock clients
    #[cfg(test)]
    pub fn for_testing(
        hub: Arc<dyn HubClient>,
        spoke: Arc<dyn SpokeClient>,
        mapper: Arc<dyn RestMapper>,
    ) -> Self {
        Self {
            hub,
            spoke,
            mapper,
            work_namespace: "cluster1".to_string(),
            resync_interval: DEFAULT_RESYNC_INTERVAL,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    hub_client: Client,
    spoke_client: Client,
    work_namespace: String,
    resync_interval: Duration,
}

impl ContextBuilder {
    fn new(hub_client: Client, spoke_client: Client, work_namespace: String) -> Self {
        Self {
            hub_client,
            spoke_client,
            work_namespace,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
        }
    }

    /// Set the periodic resync interval
    pub fn resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            hub: Arc::new(HubClientImpl::new(self.hub_client)),
            mapper: Arc::new(DiscoveryRestMapper::new(self.spoke_client.clone())),
            spoke: Arc::new(SpokeClientImpl::new(self.spoke_client)),
            work_namespace: self.work_namespace,
            resync_interval: self.resync_interval,
        }
    }
}

/// Error policy shared by the work controllers
///
/// Consistency errors need an operator's attention and are retried at the
/// resync interval rather than hammered with short backoff.
pub fn error_policy<K>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action
where
    K: kube::Resource,
{
    error!(
        ?error,
        object = %obj.name_any(),
        namespace = ?obj.namespace(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    match error {
        Error::Consistency { .. } => Action::requeue(ctx.resync_interval),
        _ => Action::requeue(ERROR_REQUEUE),
    }
}
