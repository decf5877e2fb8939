//! autopool-pool — instance pool management.
//!
//! Owns the pool's instances and their lifecycle. The manager:
//!
//! - Launches instances from the pool's launch template, with bounded
//!   exponential-backoff retry against the compute backend
//! - Drains instances through the routing backend before destroying them
//! - Enforces `min_size` / `max_size` on every operation
//! - Serializes resizes: at most one scaling operation per pool at a time
//!
//! # Architecture
//!
//! ```text
//! PoolManager
//!   ├── PoolSnapshot (versioned, behind RwLock)
//!   ├── resize lock (try_lock → ResizeInProgress)
//!   ├── Arc<dyn ComputeBackend>  (create / destroy, retried)
//!   └── Arc<dyn RoutingBackend>  (register / deregister-and-drain)
//! ```

pub mod inventory;
pub mod manager;
pub mod retry;

pub use inventory::StaticInventory;
pub use manager::{InstanceCounts, PoolManager, ResizeOutcome};
pub use retry::{RetryPolicy, retry_with_backoff};
