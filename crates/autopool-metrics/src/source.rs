//! Push-fed metrics source.
//!
//! Agents (or the REST API on their behalf) push utilization samples; the
//! controller drains them once per tick through `MetricsSource::collect`.

use std::collections::HashSet;

use tokio::sync::Mutex;
use tracing::debug;

use autopool_core::backend::BackendFuture;
use autopool_core::{InstanceId, MetricSample, MetricsSource};

#[derive(Default)]
pub struct PushMetrics {
    pending: Mutex<Vec<MetricSample>>,
}

impl PushMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, sample: MetricSample) {
        self.pending.lock().await.push(sample);
    }

    /// Samples waiting for the next collect.
    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl MetricsSource for PushMetrics {
    fn collect<'a>(&'a self, instances: &'a [InstanceId]) -> BackendFuture<'a, Vec<MetricSample>> {
        Box::pin(async move {
            let drained = std::mem::take(&mut *self.pending.lock().await);
            let wanted: HashSet<&str> = instances.iter().map(String::as_str).collect();
            let total = drained.len();
            let kept: Vec<MetricSample> = drained
                .into_iter()
                .filter(|s| wanted.contains(s.instance_id.as_str()))
                .collect();
            if kept.len() < total {
                debug!(
                    dropped = total - kept.len(),
                    "discarded samples for instances not in service"
                );
            }
            kept
        })
    }
}
