//! autopool-controller — the per-pool control loop.
//!
//! One `PoolController` task per pool ticks at the shorter of the health
//! check interval and the evaluation period. Each tick:
//!
//! 1. Probes every target concurrently and joins the results
//! 2. Promotes healthy instances, replaces unhealthy ones
//! 3. Retries failed teardowns, then converges the pool back to its
//!    desired capacity
//! 4. Pulls utilization samples into the aggregator
//! 5. At period boundaries, evaluates the alarms and resizes
//! 6. Persists the snapshot and the scaling activity history
//!
//! No pool shares state with another; the `Supervisor` only joins their
//! tasks on shutdown.

pub mod controller;
pub mod runtime;
pub mod supervisor;

pub use controller::{PoolController, TickReport};
pub use runtime::{PoolHandle, PoolRuntime, ScalingView};
pub use supervisor::Supervisor;
