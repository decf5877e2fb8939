//! ScalingEngine — turns alarm transitions into scaling intents.
//!
//! One engine per pool, owned by the pool's controller task. Every
//! evaluation feeds the same datapoint to all alarms, so the up and down
//! alarms always see the same period.

use tracing::{debug, info};

use autopool_core::{AlarmState, AlarmStatus, PoolResult, ScalingDirection, ScalingPolicy};

use crate::alarm::{Alarm, AlarmTransition};
use crate::cooldown::CooldownTracker;

/// A request to change capacity, produced by one policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingIntent {
    pub policy: String,
    pub direction: ScalingDirection,
    pub adjustment: i32,
    pub cooldown_secs: u64,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Intent(ScalingIntent),
    /// An alarm fired during cooldown; the intent is discarded.
    Suppressed { policy: String, remaining_secs: u64 },
    NoAction,
}

pub struct ScalingEngine {
    alarms: Vec<Alarm>,
    cooldown: CooldownTracker,
    last_datapoint: Option<f64>,
}

impl ScalingEngine {
    pub fn new(policies: Vec<ScalingPolicy>) -> Self {
        Self {
            alarms: policies.into_iter().map(Alarm::new).collect(),
            cooldown: CooldownTracker::new(),
            last_datapoint: None,
        }
    }

    /// Feed one period's datapoint to every alarm and decide.
    ///
    /// Only alarms entering `Alarm` on this evaluation produce intents. Up
    /// wins over down, and a down intent is dropped while any up alarm is
    /// firing.
    pub fn evaluate(&mut self, datapoint: PoolResult<f64>, now: u64) -> Decision {
        if let Ok(v) = &datapoint {
            self.last_datapoint = Some(*v);
        }

        let mut fired = Vec::new();
        for (idx, alarm) in self.alarms.iter_mut().enumerate() {
            match alarm.observe(&datapoint) {
                Some(AlarmTransition::EnteredAlarm) => {
                    info!(
                        policy = %alarm.policy().name,
                        datapoint = ?datapoint.as_ref().ok(),
                        "alarm entered ALARM"
                    );
                    fired.push(idx);
                }
                Some(AlarmTransition::ReturnedToOk) => {
                    info!(policy = %alarm.policy().name, "alarm returned to OK");
                }
                None => {}
            }
        }

        let up_firing = self
            .alarms
            .iter()
            .any(|a| {
                a.policy().direction == ScalingDirection::Up && a.state() == AlarmState::Alarm
            });

        let fired: Vec<&ScalingPolicy> = fired
            .into_iter()
            .map(|i| self.alarms[i].policy())
            .collect();
        let chosen = match fired.iter().find(|p| p.direction == ScalingDirection::Up) {
            Some(up) => Some(*up),
            None if up_firing => {
                if let Some(down) = fired.first() {
                    debug!(
                        policy = %down.name,
                        "scale-down dropped while scale-up alarm is firing"
                    );
                }
                None
            }
            None => fired.first().copied(),
        };

        let Some(policy) = chosen else {
            return Decision::NoAction;
        };

        if self.cooldown.is_active(now) {
            let remaining_secs = self.cooldown.remaining(now);
            debug!(policy = %policy.name, remaining_secs, "intent suppressed by cooldown");
            return Decision::Suppressed {
                policy: policy.name.clone(),
                remaining_secs,
            };
        }

        Decision::Intent(ScalingIntent {
            policy: policy.name.clone(),
            direction: policy.direction,
            adjustment: policy.adjustment,
            cooldown_secs: policy.cooldown_secs,
        })
    }

    /// Start the cooldown after a successful scaling action.
    pub fn record_executed(&mut self, intent: &ScalingIntent, now: u64) {
        self.cooldown.start(now, intent.cooldown_secs);
        debug!(
            policy = %intent.policy,
            until = now.saturating_add(intent.cooldown_secs),
            "cooldown started"
        );
    }

    pub fn alarm_states(&self) -> Vec<AlarmStatus> {
        self.alarms.iter().map(Alarm::status).collect()
    }

    pub fn cooldown_until(&self) -> Option<u64> {
        self.cooldown.until()
    }

    pub fn last_datapoint(&self) -> Option<f64> {
        self.last_datapoint
    }
}
