//! autopool-metrics — utilization signal for the scaling engine.
//!
//! Buffers per-instance utilization samples, reduces them into one
//! datapoint per evaluation period, and renders pool status as
//! Prometheus text.
//!
//! # Architecture
//!
//! ```text
//! PushMetrics (MetricsSource)
//!   └── push() ← REST API / agents
//!         │ collect() once per tick
//!         ▼
//! HealthAggregator
//!   ├── record_sample()  → sliding window, lazy eviction
//!   └── aggregate()      → datapoint or InsufficientData
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod aggregator;
pub mod prometheus;
pub mod source;

pub use aggregator::HealthAggregator;
pub use prometheus::render_prometheus;
pub use source::PushMetrics;
