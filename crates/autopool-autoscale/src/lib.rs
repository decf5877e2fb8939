//! autopool-autoscale — alarm-driven scaling decisions.
//!
//! Each scaling policy is bound to one alarm. Alarms observe one datapoint
//! per evaluation period and fire once on entering `Alarm`. The engine turns
//! fired alarms into at most one scaling intent, applying the up-over-down
//! tie-break and the pool-wide cooldown.
//!
//! # Architecture
//!
//! ```text
//! ScalingEngine
//!   ├── Alarm (per policy) → observe(datapoint) → EnteredAlarm / ReturnedToOk
//!   ├── CooldownTracker   → global suppression after an executed intent
//!   └── evaluate()        → Intent / Suppressed / NoAction
//! ```

pub mod alarm;
pub mod cooldown;
pub mod engine;

pub use alarm::{Alarm, AlarmTransition};
pub use cooldown::CooldownTracker;
pub use engine::{Decision, ScalingEngine, ScalingIntent};
