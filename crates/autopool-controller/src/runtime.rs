//! Pool wiring: one manager, target group, metrics source, and controller
//! per configured pool.

use std::sync::{Arc, RwLock};

use anyhow::Context;
use tracing::{info, warn};

use autopool_autoscale::ScalingEngine;
use autopool_core::{
    ActivityStatus, AlarmStatus, ComputeBackend, MetricSample, MetricsSource, PoolConfig,
    PoolResult, PoolStatus, ScalingActivity,
};
use autopool_metrics::{HealthAggregator, PushMetrics};
use autopool_pool::{PoolManager, ResizeOutcome};
use autopool_state::StateStore;
use autopool_traffic::{HealthProbe, HttpProbe, TargetGroup};

use crate::controller::PoolController;

/// Scaling state published by the controller after every tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalingView {
    pub alarms: Vec<AlarmStatus>,
    pub last_datapoint: Option<f64>,
    pub cooldown_until: Option<u64>,
}

/// Shared, cloneable access to a running pool (for the REST API).
#[derive(Clone)]
pub struct PoolHandle {
    pub name: String,
    pub manager: Arc<PoolManager>,
    pub targets: Arc<TargetGroup>,
    pub metrics: Arc<PushMetrics>,
    pub store: StateStore,
    pub(crate) scaling: Arc<RwLock<ScalingView>>,
}

impl PoolHandle {
    pub fn scaling(&self) -> ScalingView {
        self.scaling.read().expect("scaling view lock").clone()
    }

    pub async fn status(&self) -> PoolStatus {
        let view = self.scaling();
        PoolStatus {
            snapshot: self.manager.snapshot().await,
            healthy_targets: self.targets.healthy_count(),
            alarms: view.alarms,
            last_datapoint: view.last_datapoint,
            cooldown_until: view.cooldown_until,
        }
    }

    /// Manual resize. Recorded in the activity history; does not start the
    /// scaling cooldown.
    pub async fn resize(&self, delta: i32, now: u64) -> PoolResult<ResizeOutcome> {
        let result = self.manager.resize(delta, now).await;
        let (status, description) = match &result {
            Ok(outcome) => (
                ActivityStatus::Successful,
                format!("manual resize by {delta:+}: {}", outcome.describe()),
            ),
            Err(e) => (
                ActivityStatus::Failed,
                format!("manual resize by {delta:+} failed: {e}"),
            ),
        };
        let activity = ScalingActivity::new(&self.name, now, "manual", status, description);
        if let Err(e) = self.store.append_activity(&activity) {
            warn!(pool = %self.name, error = %e, "failed to record activity");
        }
        result
    }

    pub async fn push_sample(&self, sample: MetricSample) {
        self.metrics.push(sample).await;
    }
}

/// A built pool: the handle for readers and the controller for its task.
pub struct PoolRuntime {
    pub handle: PoolHandle,
    pub controller: PoolController,
}

impl PoolRuntime {
    /// Build a pool that health-checks its targets over HTTP.
    pub async fn build(
        config: PoolConfig,
        compute: Arc<dyn ComputeBackend>,
        store: StateStore,
        now: u64,
    ) -> anyhow::Result<Self> {
        let probe = Arc::new(HttpProbe::from_config(&config));
        Self::build_with_probe(config, compute, probe, store, now).await
    }

    /// Build a pool, restoring its last snapshot from the store if present.
    pub async fn build_with_probe(
        config: PoolConfig,
        compute: Arc<dyn ComputeBackend>,
        probe: Arc<dyn HealthProbe>,
        store: StateStore,
        now: u64,
    ) -> anyhow::Result<Self> {
        let targets = Arc::new(TargetGroup::from_config(&config, probe));
        let restored = store
            .get_snapshot(&config.name)
            .with_context(|| format!("loading snapshot for pool {}", config.name))?;

        let manager = match restored {
            Some(snapshot) => {
                info!(
                    pool = %config.name,
                    version = snapshot.version,
                    instances = snapshot.instances.len(),
                    "restoring pool"
                );
                let manager =
                    PoolManager::restore(config.clone(), snapshot, compute, targets.clone());
                manager
                    .resume()
                    .await
                    .with_context(|| format!("resuming pool {}", config.name))?;
                manager
            }
            None => PoolManager::new(config.clone(), compute, targets.clone(), now),
        };
        let manager = Arc::new(manager);

        let metrics = Arc::new(PushMetrics::new());
        let scaling = Arc::new(RwLock::new(ScalingView::default()));
        let handle = PoolHandle {
            name: config.name.clone(),
            manager: manager.clone(),
            targets: targets.clone(),
            metrics: metrics.clone(),
            store: store.clone(),
            scaling: scaling.clone(),
        };

        let aggregator =
            HealthAggregator::new(config.period_seconds, config.evaluation_periods, now);
        let engine = ScalingEngine::new(config.scaling_policies());
        let source: Arc<dyn MetricsSource> = metrics;
        let controller =
            PoolController::new(config, handle.clone(), source, aggregator, engine, now);

        Ok(Self { handle, controller })
    }
}
