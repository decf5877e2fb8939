//! autopool-api — REST API for autopool.
//!
//! Read access to every pool's status, targets, and scaling history, plus
//! manual resize and utilization sample ingestion.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/pools` | Status of all pools |
//! | GET | `/api/v1/pools/{name}` | Status of one pool |
//! | GET | `/api/v1/pools/{name}/targets` | Target group members and health |
//! | GET | `/api/v1/pools/{name}/activities` | Scaling activity history |
//! | POST | `/api/v1/pools/{name}/resize` | Manual capacity change |
//! | POST | `/api/v1/pools/{name}/samples` | Push a utilization sample |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use autopool_controller::PoolHandle;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub pools: Arc<BTreeMap<String, PoolHandle>>,
}

impl ApiState {
    pub fn new(pools: impl IntoIterator<Item = PoolHandle>) -> Self {
        let pools = pools.into_iter().map(|h| (h.name.clone(), h)).collect();
        Self { pools: Arc::new(pools) }
    }
}

/// Build the complete API router (REST + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/pools", get(handlers::list_pools))
        .route("/pools/{name}", get(handlers::get_pool))
        .route("/pools/{name}/targets", get(handlers::list_targets))
        .route("/pools/{name}/activities", get(handlers::list_activities))
        .route("/pools/{name}/resize", post(handlers::resize_pool))
        .route("/pools/{name}/samples", post(handlers::push_sample))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
