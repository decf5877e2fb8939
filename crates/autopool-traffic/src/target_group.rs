//! TargetGroup — membership, health, and draining for one pool.
//!
//! Targets are selected round-robin among `Healthy` ones only. Every
//! selection returns a lease that counts as one in-flight request until it
//! is dropped; deregistration waits for that count to reach zero (or for
//! the deregistration delay) before the target is removed.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use autopool_core::backend::BackendFuture;
use autopool_core::{DrainReport, InstanceId, PoolConfig, PoolError, RoutingBackend, TargetHealth};

use crate::checker::{HealthProbe, HealthTracker, ProbeResult};

/// Thresholds and timeout applied to every target of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckSettings {
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
    pub timeout: Duration,
}

impl HealthCheckSettings {
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            healthy_threshold: config.healthy_threshold,
            unhealthy_threshold: config.unhealthy_threshold,
            timeout: config.health_check_timeout(),
        }
    }
}

struct Target {
    endpoint: String,
    health: TargetHealth,
    tracker: HealthTracker,
    in_flight: Arc<AtomicUsize>,
}

/// Public view of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetStatus {
    pub instance: InstanceId,
    pub endpoint: String,
    pub health: TargetHealth,
    pub in_flight: usize,
}

/// Decrements the in-flight count and wakes drainers on drop.
struct InFlightGuard {
    count: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
        self.drained.notify_waiters();
    }
}

/// One routed request's hold on a target.
pub struct TargetLease {
    pub instance: InstanceId,
    pub endpoint: String,
    _guard: InFlightGuard,
}

pub struct TargetGroup {
    name: String,
    settings: HealthCheckSettings,
    target_port: u16,
    deregistration_delay: Duration,
    probe: Arc<dyn HealthProbe>,
    /// Ordered by instance id so round-robin order is stable.
    targets: RwLock<BTreeMap<InstanceId, Target>>,
    counter: AtomicUsize,
    drained: Arc<Notify>,
}

impl TargetGroup {
    pub fn new(
        name: &str,
        settings: HealthCheckSettings,
        target_port: u16,
        deregistration_delay: Duration,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            name: name.to_string(),
            settings,
            target_port,
            deregistration_delay,
            probe,
            targets: RwLock::new(BTreeMap::new()),
            counter: AtomicUsize::new(0),
            drained: Arc::new(Notify::new()),
        }
    }

    pub fn from_config(config: &PoolConfig, probe: Arc<dyn HealthProbe>) -> Self {
        Self::new(
            &config.name,
            HealthCheckSettings::from_config(config),
            config.target_port,
            config.deregistration_delay(),
            probe,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a target in `Initial`. Re-registering resets its health.
    pub fn add_target(&self, id: &str, address: &str) {
        let endpoint = format!("{address}:{}", self.target_port);
        let mut targets = self.targets.write().expect("targets lock");
        targets.insert(
            id.to_string(),
            Target {
                endpoint: endpoint.clone(),
                health: TargetHealth::Initial,
                tracker: HealthTracker::new(
                    self.settings.healthy_threshold,
                    self.settings.unhealthy_threshold,
                ),
                in_flight: Arc::new(AtomicUsize::new(0)),
            },
        );
        info!(group = %self.name, instance = id, %endpoint, "target registered");
    }

    /// Stop routing to a target, wait for it to drain, then remove it.
    pub async fn drain_target(&self, id: &str) -> DrainReport {
        let started = Instant::now();
        let in_flight = {
            let mut targets = self.targets.write().expect("targets lock");
            match targets.get_mut(id) {
                Some(target) => {
                    target.health = TargetHealth::Draining;
                    target.in_flight.clone()
                }
                None => {
                    debug!(group = %self.name, instance = id, "deregister of unknown target");
                    return DrainReport {
                        instance: id.to_string(),
                        drained_cleanly: true,
                        abandoned_requests: 0,
                        waited: Duration::ZERO,
                    };
                }
            }
        };
        info!(
            group = %self.name,
            instance = id,
            in_flight = in_flight.load(Ordering::Acquire),
            delay_secs = self.deregistration_delay.as_secs(),
            "draining target"
        );

        let deadline = started + self.deregistration_delay;
        let abandoned = loop {
            let notified = self.drained.notified();
            let remaining = in_flight.load(Ordering::Acquire);
            if remaining == 0 {
                break 0;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    break in_flight.load(Ordering::Acquire);
                }
            }
        };

        self.targets.write().expect("targets lock").remove(id);
        let waited = started.elapsed();
        if abandoned > 0 {
            warn!(
                group = %self.name,
                instance = id,
                abandoned,
                "deregistration delay expired with requests in flight"
            );
        } else {
            info!(
                group = %self.name,
                instance = id,
                waited_ms = waited.as_millis() as u64,
                "target drained"
            );
        }

        DrainReport {
            instance: id.to_string(),
            drained_cleanly: abandoned == 0,
            abandoned_requests: abandoned,
            waited,
        }
    }

    /// Probe every registered, non-draining target concurrently and fold
    /// the results into target health. Returns the health of all targets.
    pub async fn check_health(&self) -> HashMap<InstanceId, TargetHealth> {
        let candidates: Vec<(InstanceId, String)> = {
            let targets = self.targets.read().expect("targets lock");
            targets
                .iter()
                .filter(|(_, t)| t.health != TargetHealth::Draining)
                .map(|(id, t)| (id.clone(), t.endpoint.clone()))
                .collect()
        };

        let mut set = JoinSet::new();
        for (id, endpoint) in candidates {
            let probe = self.probe.clone();
            let timeout = self.settings.timeout;
            set.spawn(async move {
                let result = match tokio::time::timeout(timeout, probe.probe(&endpoint)).await {
                    Ok(result) => result,
                    Err(_) => {
                        let err = PoolError::HealthCheckTimeout {
                            instance: id.clone(),
                            timeout_secs: timeout.as_secs(),
                        };
                        debug!(error = %err, "counting timeout as a failed check");
                        ProbeResult::TimedOut
                    }
                };
                (id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(r) => results.push(r),
                Err(e) => warn!(group = %self.name, error = %e, "health probe task failed"),
            }
        }

        let mut targets = self.targets.write().expect("targets lock");
        for (id, result) in results {
            // Skip targets that started draining or left while probing.
            if let Some(target) = targets.get_mut(&id)
                && target.health != TargetHealth::Draining
            {
                let health = target.tracker.record(result);
                if health != target.health {
                    debug!(
                        group = %self.name,
                        instance = %id,
                        from = ?target.health,
                        to = ?health,
                        "target health changed"
                    );
                }
                target.health = health;
            }
        }
        targets.iter().map(|(id, t)| (id.clone(), t.health)).collect()
    }

    /// Next healthy target, round-robin.
    pub fn select(&self) -> Option<TargetLease> {
        let targets = self.targets.read().expect("targets lock");
        let healthy: Vec<(&InstanceId, &Target)> = targets
            .iter()
            .filter(|(_, t)| t.health.routable())
            .collect();
        if healthy.is_empty() {
            return None;
        }

        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % healthy.len();
        let (id, target) = healthy[idx];
        // Incremented under the read lock: a drain that already holds the
        // write lock never sees a new lease on its target.
        target.in_flight.fetch_add(1, Ordering::AcqRel);
        Some(TargetLease {
            instance: id.clone(),
            endpoint: target.endpoint.clone(),
            _guard: InFlightGuard {
                count: target.in_flight.clone(),
                drained: self.drained.clone(),
            },
        })
    }

    pub fn targets(&self) -> Vec<TargetStatus> {
        let targets = self.targets.read().expect("targets lock");
        targets
            .iter()
            .map(|(id, t)| TargetStatus {
                instance: id.clone(),
                endpoint: t.endpoint.clone(),
                health: t.health,
                in_flight: t.in_flight.load(Ordering::Acquire),
            })
            .collect()
    }

    pub fn healthy_count(&self) -> u32 {
        let targets = self.targets.read().expect("targets lock");
        targets.values().filter(|t| t.health.routable()).count() as u32
    }
}

impl RoutingBackend for TargetGroup {
    fn register<'a>(&'a self, id: &'a InstanceId, address: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move { self.add_target(id, address) })
    }

    fn deregister<'a>(&'a self, id: &'a InstanceId) -> BackendFuture<'a, DrainReport> {
        Box::pin(self.drain_target(id))
    }
}
