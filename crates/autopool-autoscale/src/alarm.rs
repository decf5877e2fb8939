//! Threshold alarm: an explicit state plus a consecutive-breach counter.

use tracing::debug;

use autopool_core::{AlarmState, AlarmStatus, PoolResult, ScalingPolicy};

/// A state change reported by `Alarm::observe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmTransition {
    EnteredAlarm,
    ReturnedToOk,
}

#[derive(Debug, Clone)]
pub struct Alarm {
    policy: ScalingPolicy,
    state: AlarmState,
    consecutive: u32,
}

impl Alarm {
    pub fn new(policy: ScalingPolicy) -> Self {
        Self {
            policy,
            state: AlarmState::Ok,
            consecutive: 0,
        }
    }

    pub fn policy(&self) -> &ScalingPolicy {
        &self.policy
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn consecutive_breaches(&self) -> u32 {
        self.consecutive
    }

    /// Feed one period's datapoint.
    ///
    /// - breach: counter +1; `Ok → Alarm` when it reaches `evaluation_periods`
    /// - no breach: counter reset; `Alarm → Ok`
    /// - no datapoint: counter reset, state kept
    pub fn observe(&mut self, datapoint: &PoolResult<f64>) -> Option<AlarmTransition> {
        let value = match datapoint {
            Ok(v) => *v,
            Err(e) => {
                if self.consecutive > 0 {
                    debug!(policy = %self.policy.name, reason = %e, "breach streak reset");
                }
                self.consecutive = 0;
                return None;
            }
        };

        if self.policy.comparison.breaches(value, self.policy.threshold) {
            self.consecutive = self.consecutive.saturating_add(1);
            if self.state == AlarmState::Ok && self.consecutive >= self.policy.evaluation_periods {
                self.state = AlarmState::Alarm;
                return Some(AlarmTransition::EnteredAlarm);
            }
            None
        } else {
            self.consecutive = 0;
            if self.state == AlarmState::Alarm {
                self.state = AlarmState::Ok;
                return Some(AlarmTransition::ReturnedToOk);
            }
            None
        }
    }

    pub fn status(&self) -> AlarmStatus {
        AlarmStatus {
            policy: self.policy.name.clone(),
            direction: self.policy.direction,
            state: self.state,
            consecutive_breaches: self.consecutive,
        }
    }
}
