//! autopool-traffic — routes inbound traffic to healthy instances.
//!
//! The target group tracks the pool's registered instances and their
//! health, hands out round-robin leases on healthy targets, and drains
//! targets before they are removed.
//!
//! # Architecture
//!
//! ```text
//! Listener (HTTP/1.1, listener_port)
//!   └── select() → TargetLease ──forward──▶ instance:target_port
//!
//! TargetGroup (RoutingBackend)
//!   ├── register()     → Initial
//!   ├── check_health() → JoinSet fan-out, HealthTracker thresholds
//!   └── deregister()   → Draining, wait for in-flight = 0 or delay
//! ```

pub mod checker;
pub mod listener;
pub mod target_group;

pub use checker::{HealthProbe, HealthTracker, HttpProbe, ProbeResult};
pub use listener::Listener;
pub use target_group::{HealthCheckSettings, TargetGroup, TargetLease, TargetStatus};
