//! autopool-core — shared vocabulary for the autopool crates.
//!
//! Holds the domain types (instances, pool snapshots, samples, policies),
//! the TOML configuration surface, the error kinds every component
//! reports, and the backend traits the controller drives.

pub mod backend;
pub mod config;
pub mod error;
pub mod types;

pub use backend::{BackendError, ComputeBackend, LaunchedInstance, MetricsSource, RoutingBackend};
pub use config::{AutopoolConfig, ConfigError, PoolConfig};
pub use error::{PoolError, PoolResult};
pub use types::*;
