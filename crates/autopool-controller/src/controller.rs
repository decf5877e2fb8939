//! PoolController — the single scheduling owner of one pool.
//!
//! The controller owns the aggregator and the scaling engine outright, so
//! alarm state has exactly one writer. Errors from any step are logged and
//! recorded; a tick never aborts halfway and the loop never exits on them.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use autopool_autoscale::{Decision, ScalingEngine, ScalingIntent};
use autopool_core::{
    ActivityStatus, InstanceId, MetricsSource, PoolConfig, PoolError, ScalingActivity,
    ScalingDirection, Statistic, epoch_secs,
};
use autopool_metrics::HealthAggregator;
use autopool_pool::ResizeOutcome;

use crate::runtime::{PoolHandle, ScalingView};

/// What one tick observed and did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub at: u64,
    pub healthy_targets: u32,
    /// Unhealthy instances replaced this tick.
    pub replaced: Vec<InstanceId>,
    /// Instances launched to restore desired capacity.
    pub launched: Vec<InstanceId>,
    pub samples: usize,
    /// Set when a period boundary was reached.
    pub decision: Option<Decision>,
    pub datapoint: Option<f64>,
    pub resized: Option<ResizeOutcome>,
    pub activities: Vec<ScalingActivity>,
    pub errors: Vec<String>,
}

pub struct PoolController {
    config: PoolConfig,
    handle: PoolHandle,
    source: Arc<dyn MetricsSource>,
    aggregator: HealthAggregator,
    engine: ScalingEngine,
    next_evaluation_at: u64,
    persisted_version: Option<u64>,
}

impl PoolController {
    pub fn new(
        config: PoolConfig,
        handle: PoolHandle,
        source: Arc<dyn MetricsSource>,
        aggregator: HealthAggregator,
        engine: ScalingEngine,
        started_at: u64,
    ) -> Self {
        Self {
            next_evaluation_at: started_at.saturating_add(config.period_seconds),
            config,
            handle,
            source,
            aggregator,
            engine,
            persisted_version: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn handle(&self) -> &PoolHandle {
        &self.handle
    }

    fn activity(
        &self,
        now: u64,
        cause: &str,
        status: ActivityStatus,
        description: String,
    ) -> ScalingActivity {
        ScalingActivity::new(&self.handle.name, now, cause, status, description)
    }

    /// Run one control cycle at time `now` (Unix seconds).
    pub async fn tick(&mut self, now: u64) -> TickReport {
        let mut report = TickReport {
            at: now,
            ..Default::default()
        };
        let manager = self.handle.manager.clone();

        // 1. Health fan-out, joined before anything else reads health.
        let health = self.handle.targets.check_health().await;
        report.healthy_targets = health.values().filter(|h| h.routable()).count() as u32;

        // 2. Lifecycle from health; replace what stayed unhealthy past grace.
        let unhealthy = manager.reconcile_health(&health, now).await;
        if self.config.replace_unhealthy {
            for id in unhealthy {
                match manager.replace(&id, now).await {
                    Ok(outcome) => {
                        report.activities.push(self.activity(
                            now,
                            "health",
                            ActivityStatus::Successful,
                            format!("replaced unhealthy {id}: {}", outcome.describe()),
                        ));
                        report.replaced.push(id);
                    }
                    Err(e) => {
                        warn!(
                            pool = %self.handle.name,
                            instance = %id,
                            error = %e,
                            "replacement failed"
                        );
                        report.activities.push(self.activity(
                            now,
                            "health",
                            ActivityStatus::Failed,
                            format!("replacing unhealthy {id} failed: {e}"),
                        ));
                        report.errors.push(e.to_string());
                    }
                }
            }
        }

        // 3. Teardown left behind by failed destroys, then desired capacity.
        match manager.reap_draining().await {
            Ok(reaped) if !reaped.is_empty() => {
                report.activities.push(self.activity(
                    now,
                    "cleanup",
                    ActivityStatus::Successful,
                    format!("terminated draining instance(s): {}", reaped.join(", ")),
                ));
            }
            Ok(_) | Err(PoolError::ResizeInProgress(_)) => {}
            Err(e) => {
                warn!(
                    pool = %self.handle.name,
                    error = %e,
                    "draining instances still not terminated"
                );
                report.errors.push(e.to_string());
            }
        }

        match manager.ensure_capacity(now).await {
            Ok(launched) if !launched.is_empty() => {
                report.activities.push(self.activity(
                    now,
                    "capacity",
                    ActivityStatus::Successful,
                    format!(
                        "launched {} instance(s) to reach desired capacity: {}",
                        launched.len(),
                        launched.join(", ")
                    ),
                ));
                report.launched = launched;
            }
            Ok(_) => {}
            Err(PoolError::ResizeInProgress(_)) => {
                debug!(pool = %self.handle.name, "capacity check skipped, resize in progress");
            }
            Err(e) => {
                warn!(pool = %self.handle.name, error = %e, "could not restore desired capacity");
                report.errors.push(e.to_string());
            }
        }

        // 4. Utilization samples from in-service instances.
        let in_service = manager.in_service_ids().await;
        let mut samples = self.source.collect(&in_service).await;
        samples.retain(|s| {
            self.aggregator
                .record_sample(&s.instance_id, s.utilization, s.timestamp, now)
        });
        manager.record_utilization(&samples).await;
        report.samples = samples.len();

        // 5. Alarm evaluation once per period.
        if now >= self.next_evaluation_at {
            while self.next_evaluation_at <= now {
                self.next_evaluation_at += self.config.period_seconds;
            }
            // Manual resizes restart the insufficient-data window too.
            if let Some(at) = manager.snapshot().await.last_resize_at {
                self.aggregator.reset_baseline(at);
            }
            let in_service: HashSet<InstanceId> = in_service.into_iter().collect();
            let datapoint = self
                .aggregator
                .aggregate(Statistic::Average, 1, now, &in_service);
            report.datapoint = datapoint.as_ref().ok().copied();
            if let Err(e) = &datapoint {
                debug!(pool = %self.handle.name, reason = %e, "no datapoint this period");
            }

            let decision = self.engine.evaluate(datapoint, now);
            match &decision {
                Decision::Intent(intent) => self.execute(intent, now, &mut report).await,
                Decision::Suppressed { policy, remaining_secs } => {
                    report.activities.push(self.activity(
                        now,
                        policy,
                        ActivityStatus::Skipped,
                        format!("suppressed by cooldown, {remaining_secs}s remaining"),
                    ));
                }
                Decision::NoAction => {}
            }
            report.decision = Some(decision);
        }

        self.publish();

        // 6. Persistence.
        self.persist(&report).await;
        report
    }

    /// Clamp the intent to the pool bounds and apply it.
    async fn execute(&mut self, intent: &ScalingIntent, now: u64, report: &mut TickReport) {
        let manager = self.handle.manager.clone();
        let snap = manager.snapshot().await;
        let delta = match intent.direction {
            ScalingDirection::Up => {
                let room = snap.max_size.saturating_sub(snap.live()) as i64;
                (intent.adjustment.max(0) as i64).min(room)
            }
            ScalingDirection::Down => {
                let room = snap.in_service().saturating_sub(snap.min_size) as i64;
                -((intent.adjustment.unsigned_abs() as i64).min(room))
            }
        } as i32;

        if delta == 0 {
            info!(
                pool = %self.handle.name,
                policy = %intent.policy,
                "intent skipped, pool already at its bound"
            );
            report.activities.push(self.activity(
                now,
                &intent.policy,
                ActivityStatus::Skipped,
                format!(
                    "pool at {} size ({} live, min {}, max {})",
                    if intent.direction == ScalingDirection::Up { "maximum" } else { "minimum" },
                    snap.live(),
                    snap.min_size,
                    snap.max_size
                ),
            ));
            return;
        }

        info!(pool = %self.handle.name, policy = %intent.policy, delta, "executing scaling intent");
        match manager.resize(delta, now).await {
            Ok(outcome) => {
                self.engine.record_executed(intent, now);
                self.aggregator.reset_baseline(now);
                report.activities.push(self.activity(
                    now,
                    &intent.policy,
                    ActivityStatus::Successful,
                    format!("changing capacity by {delta:+}: {}", outcome.describe()),
                ));
                report.resized = Some(outcome);
            }
            Err(e) => {
                // Dropped; the policy fires again only on its next transition.
                warn!(
                    pool = %self.handle.name,
                    policy = %intent.policy,
                    delta,
                    error = %e,
                    "scaling intent dropped"
                );
                report.activities.push(self.activity(
                    now,
                    &intent.policy,
                    ActivityStatus::Failed,
                    format!("changing capacity by {delta:+} failed: {e}"),
                ));
                report.errors.push(e.to_string());
            }
        }
    }

    fn publish(&self) {
        let view = ScalingView {
            alarms: self.engine.alarm_states(),
            last_datapoint: self.engine.last_datapoint(),
            cooldown_until: self.engine.cooldown_until(),
        };
        *self.handle.scaling.write().expect("scaling view lock") = view;
    }

    async fn persist(&mut self, report: &TickReport) {
        let snapshot = self.handle.manager.snapshot().await;
        if self.persisted_version != Some(snapshot.version) {
            match self.handle.store.put_snapshot(&snapshot) {
                Ok(()) => self.persisted_version = Some(snapshot.version),
                Err(e) => warn!(pool = %self.handle.name, error = %e, "failed to persist snapshot"),
            }
        }
        for activity in &report.activities {
            if let Err(e) = self.handle.store.append_activity(activity) {
                warn!(pool = %self.handle.name, error = %e, "failed to record activity");
            }
        }
    }

    /// Tick every `tick_interval` until shutdown. A tick that has started
    /// runs to completion; shutdown is only observed between ticks.
    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let interval = self.config.tick_interval();
        info!(pool = %self.handle.name, interval_secs = interval.as_secs(), "controller started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick(epoch_secs()).await;
                    let counts = self.handle.manager.counts().await;
                    debug!(
                        pool = %self.handle.name,
                        pending = counts.pending,
                        in_service = counts.in_service,
                        draining = counts.draining,
                        healthy = report.healthy_targets,
                        samples = report.samples,
                        datapoint = ?report.datapoint,
                        errors = report.errors.len(),
                        "tick complete"
                    );
                }
                _ = shutdown.changed() => {
                    info!(pool = %self.handle.name, "controller shutting down");
                    break;
                }
            }
        }
    }
}
