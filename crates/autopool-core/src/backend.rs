//! Backend traits the controller drives but does not implement.
//!
//! Each trait returns boxed `Send` futures so implementations can be held
//! as `Arc<dyn …>` and swapped for mocks in tests.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::types::{DrainReport, InstanceId, LaunchTemplate, MetricSample};

/// Boxed future alias used by every backend trait.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure reported by a backend call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    /// Whether retrying the same call may succeed.
    pub retryable: bool,
}

impl BackendError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// A freshly created instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedInstance {
    pub id: InstanceId,
    pub address: String,
}

/// Compute provisioning. Both calls are idempotent and safe to retry.
pub trait ComputeBackend: Send + Sync {
    fn create_instance<'a>(
        &'a self,
        template: &'a LaunchTemplate,
    ) -> BackendFuture<'a, Result<LaunchedInstance, BackendError>>;

    fn destroy_instance<'a>(
        &'a self,
        id: &'a InstanceId,
    ) -> BackendFuture<'a, Result<(), BackendError>>;
}

/// Traffic routing membership.
pub trait RoutingBackend: Send + Sync {
    /// Add an instance to the target group.
    fn register<'a>(&'a self, id: &'a InstanceId, address: &'a str) -> BackendFuture<'a, ()>;

    /// Remove an instance from the target group. Resolves once the target
    /// has drained (or the deregistration delay ran out).
    fn deregister<'a>(&'a self, id: &'a InstanceId) -> BackendFuture<'a, DrainReport>;
}

/// Per-instance utilization samples, on demand.
pub trait MetricsSource: Send + Sync {
    fn collect<'a>(&'a self, instances: &'a [InstanceId]) -> BackendFuture<'a, Vec<MetricSample>>;
}
