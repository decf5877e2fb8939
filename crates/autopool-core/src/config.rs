//! autopool.toml configuration parser.
//!
//! One `[api]` table and one or more `[[pool]]` tables. Every pool option
//! has a default, so a pool only needs a `name`.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Comparison, LaunchTemplate, ScalingDirection, ScalingPolicy, Statistic};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no pools configured")]
    NoPools,

    #[error("pool name must not be empty")]
    EmptyName,

    #[error("duplicate pool name: {0}")]
    DuplicatePool(String),

    #[error("pool {pool}: {reason}")]
    Invalid { pool: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopoolConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(rename = "pool", default)]
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

/// Victim selection on scale-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TerminationPolicy {
    #[default]
    OldestFirst,
    NewestFirst,
}

/// Static inventory of pre-provisioned hosts.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ComputeConfig {
    #[serde(default)]
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    pub name: String,
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    /// Initial capacity. Defaults to `min_size`.
    pub desired_capacity: Option<u32>,
    #[serde(default = "default_grace_period")]
    pub health_check_grace_period_seconds: u64,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_evaluation_periods")]
    pub evaluation_periods: u32,
    #[serde(default = "default_period")]
    pub period_seconds: u64,
    #[serde(default = "default_scale_up_threshold")]
    pub scale_up_threshold: f64,
    #[serde(default = "default_scale_down_threshold")]
    pub scale_down_threshold: f64,
    #[serde(default = "default_listener_port")]
    pub listener_port: u16,
    #[serde(default = "default_target_port")]
    pub target_port: u16,
    #[serde(default = "default_deregistration_delay")]
    pub deregistration_delay_seconds: u64,
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    #[serde(default = "default_health_interval")]
    pub health_check_interval_seconds: u64,
    #[serde(default = "default_health_timeout")]
    pub health_check_timeout_seconds: u64,
    #[serde(default = "default_health_path")]
    pub health_check_path: String,
    /// Inclusive status range, e.g. "200-399" or "200".
    #[serde(default = "default_success_codes")]
    pub success_codes: String,
    #[serde(default)]
    pub termination_policy: TerminationPolicy,
    #[serde(default = "default_true")]
    pub replace_unhealthy: bool,
    #[serde(default = "default_provisioning_attempts")]
    pub provisioning_attempts: u32,
    #[serde(default = "default_provisioning_backoff_ms")]
    pub provisioning_backoff_ms: u64,
    #[serde(default)]
    pub template: LaunchTemplate,
    #[serde(default)]
    pub compute: ComputeConfig,
}

fn default_api_port() -> u16 {
    9090
}
fn default_min_size() -> u32 {
    1
}
fn default_max_size() -> u32 {
    2
}
fn default_grace_period() -> u64 {
    100
}
fn default_cooldown() -> u64 {
    300
}
fn default_evaluation_periods() -> u32 {
    2
}
fn default_period() -> u64 {
    60
}
fn default_scale_up_threshold() -> f64 {
    70.0
}
fn default_scale_down_threshold() -> f64 {
    40.0
}
fn default_listener_port() -> u16 {
    80
}
fn default_target_port() -> u16 {
    8000
}
fn default_deregistration_delay() -> u64 {
    60
}
fn default_healthy_threshold() -> u32 {
    2
}
fn default_unhealthy_threshold() -> u32 {
    2
}
fn default_health_interval() -> u64 {
    30
}
fn default_health_timeout() -> u64 {
    10
}
fn default_health_path() -> String {
    "/".to_string()
}
fn default_success_codes() -> String {
    "200-399".to_string()
}
fn default_true() -> bool {
    true
}
fn default_provisioning_attempts() -> u32 {
    3
}
fn default_provisioning_backoff_ms() -> u64 {
    1000
}

impl AutopoolConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: AutopoolConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pools.is_empty() {
            return Err(ConfigError::NoPools);
        }
        let mut seen = HashSet::new();
        for pool in &self.pools {
            if !seen.insert(pool.name.as_str()) {
                return Err(ConfigError::DuplicatePool(pool.name.clone()));
            }
            pool.validate()?;
        }
        Ok(())
    }

    pub fn pool(&self, name: &str) -> Option<&PoolConfig> {
        self.pools.iter().find(|p| p.name == name)
    }
}

impl PoolConfig {
    /// A pool with every option at its default.
    pub fn with_defaults(name: &str) -> Self {
        Self {
            name: name.to_string(),
            min_size: default_min_size(),
            max_size: default_max_size(),
            desired_capacity: None,
            health_check_grace_period_seconds: default_grace_period(),
            cooldown_seconds: default_cooldown(),
            evaluation_periods: default_evaluation_periods(),
            period_seconds: default_period(),
            scale_up_threshold: default_scale_up_threshold(),
            scale_down_threshold: default_scale_down_threshold(),
            listener_port: default_listener_port(),
            target_port: default_target_port(),
            deregistration_delay_seconds: default_deregistration_delay(),
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
            health_check_interval_seconds: default_health_interval(),
            health_check_timeout_seconds: default_health_timeout(),
            health_check_path: default_health_path(),
            success_codes: default_success_codes(),
            termination_policy: TerminationPolicy::default(),
            replace_unhealthy: true,
            provisioning_attempts: default_provisioning_attempts(),
            provisioning_backoff_ms: default_provisioning_backoff_ms(),
            template: LaunchTemplate::default(),
            compute: ComputeConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        let invalid = |reason: &str| ConfigError::Invalid {
            pool: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.contains(':') {
            return Err(invalid("pool name must not contain ':'"));
        }
        if self.max_size == 0 {
            return Err(invalid("max_size must be at least 1"));
        }
        if self.min_size > self.max_size {
            return Err(invalid("min_size must not exceed max_size"));
        }
        if let Some(desired) = self.desired_capacity
            && (desired < self.min_size || desired > self.max_size)
        {
            return Err(invalid("desired_capacity must lie within [min_size, max_size]"));
        }
        if self.period_seconds == 0 {
            return Err(invalid("period_seconds must be positive"));
        }
        if self.evaluation_periods == 0 {
            return Err(invalid("evaluation_periods must be positive"));
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(invalid("scale_down_threshold must be below scale_up_threshold"));
        }
        if self.healthy_threshold == 0 || self.unhealthy_threshold == 0 {
            return Err(invalid("health thresholds must be positive"));
        }
        if self.health_check_interval_seconds == 0 {
            return Err(invalid("health_check_interval_seconds must be positive"));
        }
        if self.health_check_timeout_seconds == 0
            || self.health_check_timeout_seconds > self.health_check_interval_seconds
        {
            return Err(invalid(
                "health_check_timeout_seconds must be positive and not exceed the interval",
            ));
        }
        if self.provisioning_attempts == 0 {
            return Err(invalid("provisioning_attempts must be positive"));
        }
        if parse_status_range(&self.success_codes).is_none() {
            return Err(invalid("success_codes must look like \"200\" or \"200-399\""));
        }
        Ok(())
    }

    /// Capacity the pool converges to on start.
    pub fn initial_capacity(&self) -> u32 {
        self.desired_capacity.unwrap_or(self.min_size)
    }

    /// Controller tick: the shorter of health interval and evaluation period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds.min(self.period_seconds))
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_seconds)
    }

    pub fn deregistration_delay(&self) -> Duration {
        Duration::from_secs(self.deregistration_delay_seconds)
    }

    /// Parsed `success_codes`. Falls back to 200-399 on malformed input.
    pub fn success_range(&self) -> RangeInclusive<u16> {
        parse_status_range(&self.success_codes).unwrap_or(200..=399)
    }

    /// The simple-scaling policy pair: +1 at or above the up threshold,
    /// −1 below the down threshold.
    pub fn scaling_policies(&self) -> Vec<ScalingPolicy> {
        vec![
            ScalingPolicy {
                name: format!("{}-policy-up", self.name),
                direction: ScalingDirection::Up,
                adjustment: 1,
                cooldown_secs: self.cooldown_seconds,
                threshold: self.scale_up_threshold,
                comparison: Comparison::GreaterThanOrEqualToThreshold,
                evaluation_periods: self.evaluation_periods,
                statistic: Statistic::Average,
            },
            ScalingPolicy {
                name: format!("{}-policy-down", self.name),
                direction: ScalingDirection::Down,
                adjustment: -1,
                cooldown_secs: self.cooldown_seconds,
                threshold: self.scale_down_threshold,
                comparison: Comparison::LessThanThreshold,
                evaluation_periods: self.evaluation_periods,
                statistic: Statistic::Average,
            },
        ]
    }
}

/// Parse "200" or "200-399" into an inclusive range.
pub fn parse_status_range(s: &str) -> Option<RangeInclusive<u16>> {
    let s = s.trim();
    let (lo, hi) = match s.split_once('-') {
        Some((lo, hi)) => (lo.trim().parse::<u16>().ok()?, hi.trim().parse::<u16>().ok()?),
        None => {
            let code = s.parse::<u16>().ok()?;
            (code, code)
        }
    };
    if !(100..=599).contains(&lo) || !(100..=599).contains(&hi) || lo > hi {
        return None;
    }
    Some(lo..=hi)
}
