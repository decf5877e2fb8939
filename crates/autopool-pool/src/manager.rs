//! PoolManager — owns one pool's instances.
//!
//! Every scaling operation takes the pool's resize lock with `try_lock`: a
//! second caller fails with `ResizeInProgress` instead of queueing behind the
//! first. The lock is held until the whole operation, drain included, has
//! finished.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use autopool_core::config::TerminationPolicy;
use autopool_core::{
    ComputeBackend, DrainReport, Instance, InstanceId, LifecycleState, MetricSample, PoolConfig,
    PoolError, PoolResult, PoolSnapshot, RoutingBackend, TargetHealth,
};

use crate::retry::{RetryPolicy, retry_with_backoff};

/// What a scaling operation changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResizeOutcome {
    pub launched: Vec<InstanceId>,
    pub drained: Vec<DrainReport>,
}

impl ResizeOutcome {
    pub fn describe(&self) -> String {
        match (self.launched.len(), self.drained.len()) {
            (0, 0) => "no change".to_string(),
            (n, 0) => format!("launched {n} instance(s): {}", self.launched.join(", ")),
            (0, n) => {
                let ids: Vec<&str> = self.drained.iter().map(|r| r.instance.as_str()).collect();
                format!("terminated {n} instance(s): {}", ids.join(", "))
            }
            (l, t) => format!("replaced {t} instance(s) with {l} new"),
        }
    }
}

/// Instance counts by lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceCounts {
    pub pending: u32,
    pub in_service: u32,
    pub draining: u32,
}

pub struct PoolManager {
    name: String,
    config: PoolConfig,
    snapshot: RwLock<PoolSnapshot>,
    resize_lock: Mutex<()>,
    compute: Arc<dyn ComputeBackend>,
    routing: Arc<dyn RoutingBackend>,
    retry: RetryPolicy,
}

impl PoolManager {
    /// Create an empty pool. Call `ensure_capacity` to launch the initial
    /// instances.
    pub fn new(
        config: PoolConfig,
        compute: Arc<dyn ComputeBackend>,
        routing: Arc<dyn RoutingBackend>,
        created_at: u64,
    ) -> Self {
        let snapshot = PoolSnapshot::new(
            &config.name,
            config.min_size,
            config.max_size,
            config.initial_capacity(),
            created_at,
        );
        Self::with_snapshot(config, snapshot, compute, routing)
    }

    /// Rebuild a pool from a persisted snapshot. Bounds come from the current
    /// config. Call `resume` before the first tick.
    pub fn restore(
        config: PoolConfig,
        mut snapshot: PoolSnapshot,
        compute: Arc<dyn ComputeBackend>,
        routing: Arc<dyn RoutingBackend>,
    ) -> Self {
        snapshot.min_size = config.min_size;
        snapshot.max_size = config.max_size;
        snapshot.desired_capacity = snapshot
            .desired_capacity
            .clamp(config.min_size, config.max_size);
        Self::with_snapshot(config, snapshot, compute, routing)
    }

    fn with_snapshot(
        config: PoolConfig,
        snapshot: PoolSnapshot,
        compute: Arc<dyn ComputeBackend>,
        routing: Arc<dyn RoutingBackend>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            retry: RetryPolicy::from_config(&config),
            config,
            snapshot: RwLock::new(snapshot),
            resize_lock: Mutex::new(()),
            compute,
            routing,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn try_lock(&self) -> PoolResult<MutexGuard<'_, ()>> {
        self.resize_lock
            .try_lock()
            .map_err(|_| PoolError::ResizeInProgress(self.name.clone()))
    }

    /// Whether a scaling operation currently holds the resize lock.
    pub fn is_resizing(&self) -> bool {
        self.resize_lock.try_lock().is_err()
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub async fn snapshot(&self) -> PoolSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn version(&self) -> u64 {
        self.snapshot.read().await.version
    }

    pub async fn in_service_ids(&self) -> Vec<InstanceId> {
        self.snapshot
            .read()
            .await
            .instances
            .iter()
            .filter(|i| i.state == LifecycleState::InService)
            .map(|i| i.id.clone())
            .collect()
    }

    pub async fn counts(&self) -> InstanceCounts {
        let snap = self.snapshot.read().await;
        InstanceCounts {
            pending: snap.count(LifecycleState::Pending),
            in_service: snap.in_service(),
            draining: snap.count(LifecycleState::Draining),
        }
    }

    // ── Scaling operations ─────────────────────────────────────────

    /// Launch `n` instances.
    pub async fn launch(&self, n: u32, now: u64) -> PoolResult<ResizeOutcome> {
        let _guard = self.try_lock()?;
        let launched = self.launch_locked(n, now).await?;
        self.settle(now).await;
        Ok(ResizeOutcome {
            launched,
            drained: Vec::new(),
        })
    }

    /// Drain and terminate the given instances.
    pub async fn terminate(&self, ids: &[InstanceId], now: u64) -> PoolResult<ResizeOutcome> {
        let _guard = self.try_lock()?;
        let drained = self.terminate_locked(ids.to_vec(), true).await?;
        self.settle(now).await;
        Ok(ResizeOutcome {
            launched: Vec::new(),
            drained,
        })
    }

    /// Drain and terminate `n` in-service instances chosen by the pool's
    /// termination policy.
    pub async fn terminate_count(&self, n: u32, now: u64) -> PoolResult<ResizeOutcome> {
        let _guard = self.try_lock()?;
        let drained = self.terminate_count_locked(n).await?;
        self.settle(now).await;
        Ok(ResizeOutcome {
            launched: Vec::new(),
            drained,
        })
    }

    /// Apply a capacity delta as one serialized operation.
    pub async fn resize(&self, delta: i32, now: u64) -> PoolResult<ResizeOutcome> {
        let _guard = self.try_lock()?;
        let mut outcome = ResizeOutcome::default();
        match delta.cmp(&0) {
            Ordering::Greater => {
                outcome.launched = self.launch_locked(delta.unsigned_abs(), now).await?;
            }
            Ordering::Less => {
                outcome.drained = self.terminate_count_locked(delta.unsigned_abs()).await?;
            }
            Ordering::Equal => return Ok(outcome),
        }
        self.settle(now).await;
        info!(pool = %self.name, delta, result = %outcome.describe(), "resize complete");
        Ok(outcome)
    }

    /// Replace one unhealthy instance. The minimum is not enforced on the
    /// termination since a replacement follows immediately.
    pub async fn replace(&self, id: &InstanceId, now: u64) -> PoolResult<ResizeOutcome> {
        let _guard = self.try_lock()?;
        info!(pool = %self.name, instance = %id, "replacing unhealthy instance");
        let drained = self.terminate_locked(vec![id.clone()], false).await?;
        let launched = self.launch_locked(1, now).await?;
        Ok(ResizeOutcome { launched, drained })
    }

    /// Launch whatever is missing to reach the desired capacity.
    pub async fn ensure_capacity(&self, now: u64) -> PoolResult<Vec<InstanceId>> {
        let _guard = self.try_lock()?;
        let missing = {
            let snap = self.snapshot.read().await;
            snap.desired_capacity
                .max(snap.min_size)
                .saturating_sub(snap.live())
        };
        if missing == 0 {
            return Ok(Vec::new());
        }
        info!(pool = %self.name, missing, "pool below desired capacity");
        self.launch_locked(missing, now).await
    }

    /// Re-register restored instances with routing and finish any teardown
    /// interrupted by a restart.
    pub async fn resume(&self) -> PoolResult<()> {
        let _guard = self.try_lock()?;
        let (live, draining): (Vec<Instance>, Vec<Instance>) = {
            let snap = self.snapshot.read().await;
            snap.instances
                .iter()
                .filter(|i| i.state != LifecycleState::Terminated)
                .cloned()
                .partition(|i| i.is_live())
        };
        for inst in &live {
            self.routing.register(&inst.id, &inst.address).await;
        }
        if !draining.is_empty() {
            let ids = draining.into_iter().map(|i| i.id).collect();
            self.terminate_locked(ids, false).await?;
        }
        info!(pool = %self.name, instances = live.len(), "pool resumed from snapshot");
        Ok(())
    }

    /// Retry teardown of instances a failed destroy left draining.
    ///
    /// Outside the resize lock nothing is mid-drain, so every Draining
    /// instance seen here is stuck. Returns the instances now terminated.
    pub async fn reap_draining(&self) -> PoolResult<Vec<InstanceId>> {
        let _guard = self.try_lock()?;
        let stuck: Vec<InstanceId> = {
            let snap = self.snapshot.read().await;
            snap.instances
                .iter()
                .filter(|i| i.state == LifecycleState::Draining)
                .map(|i| i.id.clone())
                .collect()
        };
        if stuck.is_empty() {
            return Ok(Vec::new());
        }
        info!(
            pool = %self.name,
            instances = stuck.len(),
            "retrying teardown of draining instances"
        );
        let reports = self.terminate_locked(stuck, false).await?;
        Ok(reports.into_iter().map(|r| r.instance).collect())
    }

    // ── Health & metrics ───────────────────────────────────────────

    /// Fold target health into the snapshot. Pending instances become
    /// InService once healthy or once the grace period has elapsed.
    ///
    /// Returns the in-service instances that are unhealthy past their grace
    /// period.
    pub async fn reconcile_health(
        &self,
        health: &HashMap<InstanceId, TargetHealth>,
        now: u64,
    ) -> Vec<InstanceId> {
        let grace = self.config.health_check_grace_period_seconds;
        let mut snap = self.snapshot.write().await;
        let mut changed = false;
        let mut unhealthy = Vec::new();

        for inst in snap.instances.iter_mut() {
            if let Some(h) = health.get(&inst.id)
                && inst.health != Some(*h)
            {
                inst.health = Some(*h);
                changed = true;
            }
            let past_grace = now >= inst.launched_at.saturating_add(grace);
            match inst.state {
                LifecycleState::Pending
                    if inst.health == Some(TargetHealth::Healthy) || past_grace =>
                {
                    inst.state = LifecycleState::InService;
                    changed = true;
                    info!(
                        pool = %self.name,
                        instance = %inst.id,
                        health = ?inst.health,
                        "instance in service"
                    );
                }
                LifecycleState::InService
                    if past_grace && inst.health == Some(TargetHealth::Unhealthy) =>
                {
                    unhealthy.push(inst.id.clone());
                }
                _ => {}
            }
        }

        if changed {
            snap.version += 1;
        }
        unhealthy
    }

    /// Remember the latest utilization per instance. Not a versioned change.
    pub async fn record_utilization(&self, samples: &[MetricSample]) {
        let mut snap = self.snapshot.write().await;
        for sample in samples {
            if let Some(inst) = snap.get_mut(&sample.instance_id) {
                inst.utilization = Some(sample.utilization);
            }
        }
    }

    // ── Internals (resize lock held) ───────────────────────────────

    async fn launch_locked(&self, n: u32, now: u64) -> PoolResult<Vec<InstanceId>> {
        {
            let snap = self.snapshot.read().await;
            let live = snap.live();
            if live + n > snap.max_size {
                return Err(PoolError::CapacityExceeded {
                    requested: n,
                    current: live,
                    max: snap.max_size,
                });
            }
        }

        let mut launched = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let created = retry_with_backoff(&self.retry, "create_instance", || {
                self.compute.create_instance(&self.config.template)
            })
            .await
            .inspect_err(|e| {
                warn!(pool = %self.name, launched = launched.len(), error = %e, "launch abandoned");
            })?;

            {
                let mut snap = self.snapshot.write().await;
                snap.instances
                    .push(Instance::new(created.id.clone(), created.address.clone(), now));
                snap.version += 1;
            }
            self.routing.register(&created.id, &created.address).await;
            info!(
                pool = %self.name,
                instance = %created.id,
                address = %created.address,
                "instance launched"
            );
            launched.push(created.id);
        }
        Ok(launched)
    }

    async fn terminate_count_locked(&self, n: u32) -> PoolResult<Vec<DrainReport>> {
        let victims = {
            let snap = self.snapshot.read().await;
            let in_service = snap.in_service();
            if in_service < n + snap.min_size {
                return Err(PoolError::BelowMinimum {
                    requested: n,
                    in_service,
                    min: snap.min_size,
                });
            }
            select_victims(&snap, n, self.config.termination_policy)
        };
        self.terminate_locked(victims, true).await
    }

    async fn terminate_locked(
        &self,
        mut ids: Vec<InstanceId>,
        enforce_min: bool,
    ) -> PoolResult<Vec<DrainReport>> {
        let mut seen = HashSet::new();
        ids.retain(|id| seen.insert(id.clone()));

        {
            let mut snap = self.snapshot.write().await;
            if let Some(missing) = ids.iter().find(|id| snap.get(id).is_none()) {
                return Err(PoolError::UnknownInstance(missing.clone()));
            }
            let in_service = snap.in_service();
            let removing = ids
                .iter()
                .filter(|id| snap.get(id).is_some_and(|i| i.state == LifecycleState::InService))
                .count() as u32;
            if enforce_min && in_service.saturating_sub(removing) < snap.min_size {
                return Err(PoolError::BelowMinimum {
                    requested: removing,
                    in_service,
                    min: snap.min_size,
                });
            }
            for id in &ids {
                if let Some(inst) = snap.get_mut(id) {
                    inst.state = LifecycleState::Draining;
                    inst.health = Some(TargetHealth::Draining);
                }
            }
            snap.version += 1;
        }

        // Drain every victim concurrently; each destroy waits for its own drain.
        let mut set = JoinSet::new();
        for id in ids {
            let routing = self.routing.clone();
            let compute = self.compute.clone();
            let retry = self.retry;
            set.spawn(async move {
                let report = routing.deregister(&id).await;
                debug!(
                    instance = %id,
                    clean = report.drained_cleanly,
                    abandoned = report.abandoned_requests,
                    "drain finished"
                );
                let destroyed = retry_with_backoff(&retry, "destroy_instance", || {
                    compute.destroy_instance(&id)
                })
                .await;
                (id, report, destroyed)
            });
        }

        let mut reports = Vec::new();
        let mut first_error = None;
        let mut terminated = HashSet::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, report, Ok(()))) => {
                    info!(
                        pool = %self.name,
                        instance = %id,
                        waited_ms = report.waited.as_millis() as u64,
                        "instance terminated"
                    );
                    terminated.insert(id);
                    reports.push(report);
                }
                Ok((id, _, Err(e))) => {
                    warn!(
                        pool = %self.name,
                        instance = %id,
                        error = %e,
                        "destroy failed, instance left draining"
                    );
                    first_error.get_or_insert(e);
                }
                Err(e) => warn!(pool = %self.name, error = %e, "drain task failed"),
            }
        }

        {
            let mut snap = self.snapshot.write().await;
            snap.instances.retain(|i| !terminated.contains(&i.id));
            snap.version += 1;
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                reports.sort_by(|a, b| a.instance.cmp(&b.instance));
                Ok(reports)
            }
        }
    }

    /// Record a completed scaling operation: the desired capacity follows
    /// the pool's new size.
    async fn settle(&self, now: u64) {
        let mut snap = self.snapshot.write().await;
        snap.desired_capacity = snap.live().clamp(snap.min_size, snap.max_size);
        snap.last_resize_at = Some(now);
        snap.version += 1;
    }
}

/// Pick `n` in-service instances, oldest or newest first. Ties break on id.
fn select_victims(snap: &PoolSnapshot, n: u32, policy: TerminationPolicy) -> Vec<InstanceId> {
    let mut candidates: Vec<&Instance> = snap
        .instances
        .iter()
        .filter(|i| i.state == LifecycleState::InService)
        .collect();
    candidates.sort_by(|a, b| (a.launched_at, &a.id).cmp(&(b.launched_at, &b.id)));
    if policy == TerminationPolicy::NewestFirst {
        candidates.reverse();
    }
    candidates
        .into_iter()
        .take(n as usize)
        .map(|i| i.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering as AtomicOrdering};
    use std::time::Duration;

    use autopool_core::backend::BackendFuture;
    use autopool_core::{BackendError, LaunchTemplate, LaunchedInstance};

    type Events = Arc<StdMutex<Vec<String>>>;

    struct FakeCompute {
        next: AtomicU32,
        /// Destroys fail fatally while set.
        broken_destroys: AtomicBool,
        /// Retryable failures to return before succeeding.
        flaky: AtomicU32,
        capacity: u32,
        creates: AtomicU32,
        events: Events,
    }

    impl FakeCompute {
        fn new(events: Events) -> Self {
            Self {
                next: AtomicU32::new(1),
                broken_destroys: AtomicBool::new(false),
                flaky: AtomicU32::new(0),
                capacity: u32::MAX,
                creates: AtomicU32::new(0),
                events,
            }
        }
    }

    impl ComputeBackend for FakeCompute {
        fn create_instance<'a>(
            &'a self,
            _template: &'a LaunchTemplate,
        ) -> BackendFuture<'a, Result<LaunchedInstance, BackendError>> {
            Box::pin(async move {
                self.creates.fetch_add(1, AtomicOrdering::SeqCst);
                if self.flaky.load(AtomicOrdering::SeqCst) > 0 {
                    self.flaky.fetch_sub(1, AtomicOrdering::SeqCst);
                    return Err(BackendError::retryable("throttled"));
                }
                let n = self.next.fetch_add(1, AtomicOrdering::SeqCst);
                if n > self.capacity {
                    return Err(BackendError::fatal("no capacity"));
                }
                Ok(LaunchedInstance {
                    id: format!("i-{n}"),
                    address: format!("10.0.0.{n}"),
                })
            })
        }

        fn destroy_instance<'a>(
            &'a self,
            id: &'a InstanceId,
        ) -> BackendFuture<'a, Result<(), BackendError>> {
            Box::pin(async move {
                if self.broken_destroys.load(AtomicOrdering::SeqCst) {
                    return Err(BackendError::fatal("host unreachable"));
                }
                self.events.lock().unwrap().push(format!("destroy:{id}"));
                Ok(())
            })
        }
    }

    struct RecordingRouting {
        drain: Duration,
        events: Events,
    }

    impl RoutingBackend for RecordingRouting {
        fn register<'a>(&'a self, id: &'a InstanceId, _address: &'a str) -> BackendFuture<'a, ()> {
            Box::pin(async move {
                self.events.lock().unwrap().push(format!("register:{id}"));
            })
        }

        fn deregister<'a>(&'a self, id: &'a InstanceId) -> BackendFuture<'a, DrainReport> {
            Box::pin(async move {
                tokio::time::sleep(self.drain).await;
                self.events.lock().unwrap().push(format!("drained:{id}"));
                DrainReport {
                    instance: id.clone(),
                    drained_cleanly: true,
                    abandoned_requests: 0,
                    waited: self.drain,
                }
            })
        }
    }

    fn config(min: u32, max: u32) -> PoolConfig {
        let mut config = PoolConfig::with_defaults("web");
        config.min_size = min;
        config.max_size = max;
        config.provisioning_backoff_ms = 100;
        config
    }

    fn manager_with(
        config: PoolConfig,
        compute: FakeCompute,
        drain: Duration,
        events: Events,
    ) -> PoolManager {
        let routing = RecordingRouting { drain, events };
        PoolManager::new(config, Arc::new(compute), Arc::new(routing), 1000)
    }

    fn manager(min: u32, max: u32) -> (PoolManager, Events) {
        let events: Events = Arc::default();
        let compute = FakeCompute::new(events.clone());
        (manager_with(config(min, max), compute, Duration::ZERO, events.clone()), events)
    }

    async fn mark_all_healthy(mgr: &PoolManager, now: u64) {
        let health = mgr
            .snapshot()
            .await
            .instances
            .iter()
            .map(|i| (i.id.clone(), TargetHealth::Healthy))
            .collect();
        mgr.reconcile_health(&health, now).await;
    }

    #[tokio::test]
    async fn ensure_capacity_launches_to_desired() {
        let (mgr, events) = manager(1, 2);

        let launched = mgr.ensure_capacity(1000).await.unwrap();
        assert_eq!(launched, vec!["i-1".to_string()]);

        let snap = mgr.snapshot().await;
        assert_eq!(snap.count(LifecycleState::Pending), 1);
        assert!(events.lock().unwrap().contains(&"register:i-1".to_string()));

        // Already at desired.
        assert!(mgr.ensure_capacity(1001).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn launch_beyond_max_is_rejected_without_backend_calls() {
        let events: Events = Arc::default();
        let compute = Arc::new(FakeCompute::new(events.clone()));
        let routing = Arc::new(RecordingRouting {
            drain: Duration::ZERO,
            events,
        });
        let mgr = PoolManager::new(config(1, 2), compute.clone(), routing, 1000);

        mgr.launch(2, 1000).await.unwrap();
        let err = mgr.launch(1, 1001).await.unwrap_err();

        assert_eq!(
            err,
            PoolError::CapacityExceeded {
                requested: 1,
                current: 2,
                max: 2
            }
        );
        assert_eq!(compute.creates.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn terminate_below_min_is_rejected() {
        let (mgr, _) = manager(1, 2);
        mgr.ensure_capacity(1000).await.unwrap();
        mark_all_healthy(&mgr, 1010).await;

        let err = mgr.resize(-1, 1020).await.unwrap_err();
        assert!(matches!(err, PoolError::BelowMinimum { requested: 1, in_service: 1, min: 1 }));
        assert_eq!(mgr.snapshot().await.in_service(), 1);
    }

    #[tokio::test]
    async fn unknown_instance_is_rejected() {
        let (mgr, _) = manager(0, 2);
        let err = mgr.terminate(&["i-404".to_string()], 1000).await.unwrap_err();
        assert_eq!(err, PoolError::UnknownInstance("i-404".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_finishes_before_destroy() {
        let events: Events = Arc::default();
        let compute = FakeCompute::new(events.clone());
        let mgr = manager_with(config(1, 2), compute, Duration::from_secs(5), events.clone());
        mgr.launch(2, 1000).await.unwrap();
        mark_all_healthy(&mgr, 1010).await;

        let outcome = mgr.resize(-1, 1020).await.unwrap();

        assert_eq!(outcome.drained.len(), 1);
        let victim = &outcome.drained[0].instance;
        let log = events.lock().unwrap().clone();
        let drained = log.iter().position(|e| e == &format!("drained:{victim}")).unwrap();
        let destroyed = log.iter().position(|e| e == &format!("destroy:{victim}")).unwrap();
        assert!(drained < destroyed);

        let snap = mgr.snapshot().await;
        assert!(snap.get(victim).is_none());
        assert_eq!(snap.in_service(), 1);
        assert_eq!(snap.desired_capacity, 1);
        assert_eq!(snap.last_resize_at, Some(1020));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_resize_fails_fast() {
        let events: Events = Arc::default();
        let compute = FakeCompute::new(events.clone());
        let mgr = Arc::new(manager_with(config(1, 2), compute, Duration::from_secs(60), events));
        mgr.launch(2, 1000).await.unwrap();
        mark_all_healthy(&mgr, 1010).await;

        let first = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.resize(-1, 1020).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(mgr.is_resizing());

        let second = mgr.resize(-1, 1021).await;
        assert_eq!(second, Err(PoolError::ResizeInProgress("web".to_string())));

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.drained.len(), 1);
        assert_eq!(mgr.snapshot().await.in_service(), 1);
    }

    #[tokio::test]
    async fn reconcile_promotes_on_health_or_grace() {
        let (mgr, _) = manager(0, 2);
        mgr.launch(2, 1000).await.unwrap();

        let health = HashMap::from([("i-1".to_string(), TargetHealth::Healthy)]);
        mgr.reconcile_health(&health, 1030).await;
        let snap = mgr.snapshot().await;
        assert_eq!(snap.get("i-1").unwrap().state, LifecycleState::InService);
        assert_eq!(snap.get("i-2").unwrap().state, LifecycleState::Pending);

        // Grace period (100 s) elapsed.
        mgr.reconcile_health(&HashMap::new(), 1100).await;
        assert_eq!(mgr.snapshot().await.in_service(), 2);
    }

    #[tokio::test]
    async fn unhealthy_reported_only_past_grace() {
        let (mgr, _) = manager(0, 2);
        mgr.launch(1, 1000).await.unwrap();
        let healthy = HashMap::from([("i-1".to_string(), TargetHealth::Healthy)]);
        mgr.reconcile_health(&healthy, 1010).await;

        let unhealthy = HashMap::from([("i-1".to_string(), TargetHealth::Unhealthy)]);
        assert!(mgr.reconcile_health(&unhealthy, 1050).await.is_empty());
        assert_eq!(mgr.reconcile_health(&unhealthy, 1100).await, vec!["i-1".to_string()]);
    }

    #[tokio::test]
    async fn replace_works_at_minimum() {
        let (mgr, _) = manager(1, 1);
        mgr.ensure_capacity(1000).await.unwrap();
        mark_all_healthy(&mgr, 1010).await;

        let outcome = mgr.replace(&"i-1".to_string(), 1200).await.unwrap();

        assert_eq!(outcome.launched, vec!["i-2".to_string()]);
        let snap = mgr.snapshot().await;
        assert!(snap.get("i-1").is_none());
        assert_eq!(snap.get("i-2").unwrap().state, LifecycleState::Pending);
        assert_eq!(snap.desired_capacity, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_launch_failures_are_retried() {
        let events: Events = Arc::default();
        let compute = FakeCompute::new(events.clone());
        compute.flaky.store(2, AtomicOrdering::SeqCst);
        let mgr = manager_with(config(1, 2), compute, Duration::ZERO, events);

        let launched = mgr.ensure_capacity(1000).await.unwrap();
        assert_eq!(launched.len(), 1);
    }

    #[tokio::test]
    async fn failed_batch_keeps_launched_instances() {
        let events: Events = Arc::default();
        let mut compute = FakeCompute::new(events.clone());
        compute.capacity = 1;
        let mgr = manager_with(config(0, 3), compute, Duration::ZERO, events);

        let err = mgr.resize(2, 1000).await.unwrap_err();

        assert!(matches!(err, PoolError::ProvisioningFailure { attempts: 1, .. }));
        let snap = mgr.snapshot().await;
        assert_eq!(snap.live(), 1);
        assert_eq!(snap.last_resize_at, None);
    }

    #[tokio::test]
    async fn termination_policy_picks_oldest_first() {
        let (mgr, _) = manager(0, 3);
        mgr.launch(1, 1000).await.unwrap();
        mgr.launch(1, 900).await.unwrap();
        mgr.launch(1, 1100).await.unwrap();
        mark_all_healthy(&mgr, 1200).await;

        let outcome = mgr.terminate_count(1, 1300).await.unwrap();
        assert_eq!(outcome.drained[0].instance, "i-2");
    }

    #[tokio::test]
    async fn every_mutation_bumps_version() {
        let (mgr, _) = manager(1, 2);
        let v0 = mgr.version().await;
        mgr.ensure_capacity(1000).await.unwrap();
        let v1 = mgr.version().await;
        mark_all_healthy(&mgr, 1010).await;
        let v2 = mgr.version().await;
        assert!(v0 < v1 && v1 < v2);

        // Utilization alone is not a versioned change.
        mgr.record_utilization(&[MetricSample {
            instance_id: "i-1".to_string(),
            timestamp: 1011,
            utilization: 55.0,
        }])
        .await;
        assert_eq!(mgr.version().await, v2);
        assert_eq!(mgr.snapshot().await.get("i-1").unwrap().utilization, Some(55.0));
    }

    #[tokio::test]
    async fn restore_reregisters_and_finishes_teardown() {
        let events: Events = Arc::default();
        let mut snapshot = PoolSnapshot::new("web", 1, 2, 2, 500);
        let mut live = Instance::new("i-1".to_string(), "10.0.0.1".to_string(), 500);
        live.state = LifecycleState::InService;
        let mut draining = Instance::new("i-2".to_string(), "10.0.0.2".to_string(), 500);
        draining.state = LifecycleState::Draining;
        snapshot.instances = vec![live, draining];

        let mgr = PoolManager::restore(
            config(1, 2),
            snapshot,
            Arc::new(FakeCompute::new(events.clone())),
            Arc::new(RecordingRouting {
                drain: Duration::ZERO,
                events: events.clone(),
            }),
        );
        mgr.resume().await.unwrap();

        let log = events.lock().unwrap().clone();
        assert!(log.contains(&"register:i-1".to_string()));
        assert!(log.contains(&"destroy:i-2".to_string()));
        let snap = mgr.snapshot().await;
        assert_eq!(snap.instances.len(), 1);
        assert_eq!(snap.desired_capacity, 2);
    }

    #[tokio::test]
    async fn stuck_draining_instances_are_reaped() {
        let events: Events = Arc::default();
        let compute = Arc::new(FakeCompute::new(events.clone()));
        let routing = Arc::new(RecordingRouting {
            drain: Duration::ZERO,
            events: events.clone(),
        });
        let mgr = PoolManager::new(config(1, 3), compute.clone(), routing, 1000);
        mgr.launch(2, 1000).await.unwrap();
        mark_all_healthy(&mgr, 1010).await;

        compute.broken_destroys.store(true, AtomicOrdering::SeqCst);
        assert!(mgr.resize(-1, 1020).await.is_err());
        assert_eq!(mgr.counts().await.draining, 1);

        // Still broken: the instance stays draining, nothing is lost.
        assert!(mgr.reap_draining().await.is_err());
        assert_eq!(mgr.counts().await.draining, 1);

        compute.broken_destroys.store(false, AtomicOrdering::SeqCst);
        assert_eq!(mgr.reap_draining().await.unwrap(), vec!["i-1".to_string()]);
        mgr.ensure_capacity(1030).await.unwrap();
        mark_all_healthy(&mgr, 1040).await;

        assert!(events.lock().unwrap().contains(&"destroy:i-1".to_string()));
        assert_eq!(
            mgr.counts().await,
            InstanceCounts {
                pending: 0,
                in_service: 2,
                draining: 0,
            }
        );
        assert!(mgr.reap_draining().await.unwrap().is_empty());
    }
}
