//! Sliding-window utilization aggregation.
//!
//! Samples are kept per instance for `evaluation_periods × period` seconds
//! behind the controller's clock, and evicted lazily on record and on
//! aggregate. Samples stamped more than one period ahead of that clock are
//! dropped. The aggregator is owned by one controller task and needs no
//! locking.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, trace};

use autopool_core::{InstanceId, PoolError, PoolResult, Statistic};

pub struct HealthAggregator {
    period_secs: u64,
    evaluation_periods: u32,
    created_at: u64,
    /// Last resize. Periods are counted from `max(created_at, baseline)`.
    baseline: u64,
    /// instance_id → (timestamp, utilization), oldest first.
    samples: HashMap<InstanceId, VecDeque<(u64, f64)>>,
}

impl HealthAggregator {
    pub fn new(period_secs: u64, evaluation_periods: u32, created_at: u64) -> Self {
        Self {
            period_secs: period_secs.max(1),
            evaluation_periods: evaluation_periods.max(1),
            created_at,
            baseline: created_at,
            samples: HashMap::new(),
        }
    }

    pub fn period_secs(&self) -> u64 {
        self.period_secs
    }

    /// Retention horizon in seconds.
    fn retention(&self) -> u64 {
        self.period_secs * self.evaluation_periods as u64
    }

    /// Buffer one sample observed at `timestamp`, with `now` as the
    /// controller's clock. Returns whether the sample was kept.
    pub fn record_sample(
        &mut self,
        instance_id: &str,
        utilization: f64,
        timestamp: u64,
        now: u64,
    ) -> bool {
        if !utilization.is_finite() {
            trace!(%instance_id, "ignoring non-finite sample");
            return false;
        }
        if timestamp > now.saturating_add(self.period_secs) {
            debug!(%instance_id, timestamp, now, "ignoring sample from the future");
            return false;
        }
        self.evict(now);
        if timestamp <= self.horizon(now) {
            trace!(%instance_id, timestamp, "ignoring expired sample");
            return false;
        }
        let window = self.samples.entry(instance_id.to_string()).or_default();
        // Keep each window sorted; pushers deliver mostly in order.
        let pos = window.partition_point(|(ts, _)| *ts <= timestamp);
        window.insert(pos, (timestamp, utilization));
        true
    }

    /// Number of samples currently buffered.
    pub fn len(&self) -> usize {
        self.samples.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn horizon(&self, now: u64) -> u64 {
        now.saturating_sub(self.retention())
    }

    fn evict(&mut self, now: u64) {
        let horizon = self.horizon(now);
        for window in self.samples.values_mut() {
            while window.front().is_some_and(|(ts, _)| *ts <= horizon) {
                window.pop_front();
            }
        }
        self.samples.retain(|_, w| !w.is_empty());
    }

    /// Whole periods elapsed since creation or the last resize.
    pub fn elapsed_periods(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at.max(self.baseline)) / self.period_secs
    }

    /// Reduce samples with `now - window×period < ts ≤ now` from in-service
    /// instances into one datapoint.
    pub fn aggregate(
        &mut self,
        statistic: Statistic,
        window_periods: u32,
        now: u64,
        in_service: &HashSet<InstanceId>,
    ) -> PoolResult<f64> {
        let elapsed = self.elapsed_periods(now);
        let insufficient = PoolError::InsufficientData {
            elapsed_periods: elapsed,
            required: window_periods,
        };
        if elapsed < window_periods as u64 {
            return Err(insufficient);
        }

        self.evict(now);
        let start = now.saturating_sub(window_periods as u64 * self.period_secs);
        let values: Vec<f64> = self
            .samples
            .iter()
            .filter(|(id, _)| in_service.contains(*id))
            .flat_map(|(_, window)| window.iter())
            .filter(|(ts, _)| *ts > start && *ts <= now)
            .map(|(_, v)| *v)
            .collect();

        statistic.compute(&values).ok_or(insufficient)
    }

    /// Restart the insufficient-data window at `at`, e.g. after a resize.
    /// An older timestamp than the current baseline is ignored.
    pub fn reset_baseline(&mut self, at: u64) {
        self.baseline = self.baseline.max(at);
    }
}
