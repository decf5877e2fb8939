//! Domain types for the autopool controller.
//!
//! These represent the live pool topology (instances and their lifecycle),
//! the utilization samples feeding the alarms, the scaling policies, and the
//! activity history. All types serialize to JSON for the state store and the
//! REST API.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for a compute instance, e.g. `i-0000002a`.
pub type InstanceId = String;

/// Unique name of a pool.
pub type PoolName = String;

// ── Launch template ───────────────────────────────────────────────

/// What the compute backend is asked to launch. Always the latest version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LaunchTemplate {
    pub image_id: String,
    pub instance_type: String,
    /// Tags propagated to every launched instance.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

// ── Instance ──────────────────────────────────────────────────────

/// Lifecycle of an instance inside a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    InService,
    Draining,
    Terminated,
}

/// Target health as seen by the traffic distributor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetHealth {
    /// Registered, no threshold reached yet.
    Initial,
    Healthy,
    Unhealthy,
    Draining,
}

impl TargetHealth {
    /// Only healthy targets receive traffic.
    pub fn routable(self) -> bool {
        self == TargetHealth::Healthy
    }
}

/// A compute instance owned by a pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: InstanceId,
    /// Host (no port) the instance serves on.
    pub address: String,
    /// Unix timestamp (seconds) of launch.
    pub launched_at: u64,
    pub state: LifecycleState,
    /// Last health check result reported by the target group.
    pub health: Option<TargetHealth>,
    /// Last reported utilization (percent).
    pub utilization: Option<f64>,
}

impl Instance {
    pub fn new(id: InstanceId, address: String, launched_at: u64) -> Self {
        Self {
            id,
            address,
            launched_at,
            state: LifecycleState::Pending,
            health: None,
            utilization: None,
        }
    }

    /// Whether the instance counts against `max_size`.
    pub fn is_live(&self) -> bool {
        matches!(self.state, LifecycleState::Pending | LifecycleState::InService)
    }
}

// ── Pool snapshot ─────────────────────────────────────────────────

/// Versioned view of a pool. Every mutation bumps `version`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolSnapshot {
    pub name: PoolName,
    pub version: u64,
    pub min_size: u32,
    pub max_size: u32,
    /// Capacity the pool converges back to after launch failures or
    /// replacements. Follows successful scaling operations.
    pub desired_capacity: u32,
    /// Unix timestamp (seconds) when the pool was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last successful resize.
    pub last_resize_at: Option<u64>,
    pub instances: Vec<Instance>,
}

impl PoolSnapshot {
    pub fn new(
        name: &str,
        min_size: u32,
        max_size: u32,
        desired_capacity: u32,
        created_at: u64,
    ) -> Self {
        Self {
            name: name.to_string(),
            version: 0,
            min_size,
            max_size,
            desired_capacity: desired_capacity.clamp(min_size, max_size),
            created_at,
            last_resize_at: None,
            instances: Vec::new(),
        }
    }

    /// Count instances in a given lifecycle state.
    pub fn count(&self, state: LifecycleState) -> u32 {
        self.instances.iter().filter(|i| i.state == state).count() as u32
    }

    pub fn in_service(&self) -> u32 {
        self.count(LifecycleState::InService)
    }

    /// Pending + InService.
    pub fn live(&self) -> u32 {
        self.instances.iter().filter(|i| i.is_live()).count() as u32
    }

    pub fn get(&self, id: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }

    /// Whether `min_size ≤ InService ≤ max_size` currently holds.
    pub fn within_bounds(&self) -> bool {
        let n = self.in_service();
        self.min_size <= n && n <= self.max_size
    }
}

// ── Metrics ───────────────────────────────────────────────────────

/// One utilization observation for one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub instance_id: InstanceId,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Utilization in percent (0–100).
    pub utilization: f64,
}

/// Statistic computed over a window of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    #[default]
    Average,
    Maximum,
    Minimum,
    Sum,
    SampleCount,
}

impl Statistic {
    /// Compute the statistic. Returns `None` for an empty input.
    pub fn compute(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let v = match self {
            Statistic::Average => values.iter().sum::<f64>() / values.len() as f64,
            Statistic::Maximum => values.iter().copied().fold(f64::MIN, f64::max),
            Statistic::Minimum => values.iter().copied().fold(f64::MAX, f64::min),
            Statistic::Sum => values.iter().sum(),
            Statistic::SampleCount => values.len() as f64,
        };
        Some(v)
    }
}

// ── Scaling policy ────────────────────────────────────────────────

/// Comparison between the aggregated statistic and the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    GreaterThanOrEqualToThreshold,
    GreaterThanThreshold,
    LessThanThreshold,
    LessThanOrEqualToThreshold,
}

impl Comparison {
    pub fn breaches(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThanOrEqualToThreshold => value >= threshold,
            Comparison::GreaterThanThreshold => value > threshold,
            Comparison::LessThanThreshold => value < threshold,
            Comparison::LessThanOrEqualToThreshold => value <= threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingDirection {
    Up,
    Down,
}

/// A simple-scaling policy bound to exactly one alarm. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingPolicy {
    pub name: String,
    pub direction: ScalingDirection,
    /// Change in capacity applied when the alarm fires.
    pub adjustment: i32,
    pub cooldown_secs: u64,
    pub threshold: f64,
    pub comparison: Comparison,
    /// Consecutive breaching periods before the alarm fires.
    pub evaluation_periods: u32,
    pub statistic: Statistic,
}

/// Alarm state as exposed to status readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    Ok,
    Alarm,
}

/// Point-in-time view of one alarm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlarmStatus {
    pub policy: String,
    pub direction: ScalingDirection,
    pub state: AlarmState,
    pub consecutive_breaches: u32,
}

// ── Status & activity ─────────────────────────────────────────────

/// Aggregated pool status for the API and Prometheus exposition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolStatus {
    pub snapshot: PoolSnapshot,
    pub healthy_targets: u32,
    pub alarms: Vec<AlarmStatus>,
    /// Most recent aggregated datapoint, if any.
    pub last_datapoint: Option<f64>,
    /// Unix timestamp until which scaling is suppressed.
    pub cooldown_until: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Successful,
    Failed,
    Skipped,
}

/// One entry of the scaling history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingActivity {
    pub pool: PoolName,
    /// Assigned by the state store on append.
    pub seq: u64,
    /// Unix timestamp (seconds).
    pub at: u64,
    /// What triggered the activity (policy name, "manual", "health", ...).
    pub cause: String,
    pub status: ActivityStatus,
    pub description: String,
}

impl ScalingActivity {
    pub fn new(
        pool: &str,
        at: u64,
        cause: &str,
        status: ActivityStatus,
        description: String,
    ) -> Self {
        Self {
            pool: pool.to_string(),
            seq: 0,
            at,
            cause: cause.to_string(),
            status,
            description,
        }
    }

    /// Composite key for the activities table.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.pool, self.seq)
    }
}

/// Outcome of draining one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub instance: InstanceId,
    /// True if all in-flight requests finished before the delay ran out.
    pub drained_cleanly: bool,
    /// Requests still in flight when the deregistration delay expired.
    pub abandoned_requests: usize,
    pub waited: Duration,
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
