//! REST API handlers.
//!
//! Each handler looks up the pool by name and returns JSON responses.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::info;

use autopool_controller::PoolHandle;
use autopool_core::{DrainReport, InstanceId, MetricSample, PoolError, epoch_secs};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn pool_not_found() -> axum::response::Response {
    error_response("pool not found", StatusCode::NOT_FOUND).into_response()
}

fn lookup<'a>(state: &'a ApiState, name: &str) -> Option<&'a PoolHandle> {
    state.pools.get(name)
}

// ── Pools ──────────────────────────────────────────────────────

/// GET /api/v1/pools
pub async fn list_pools(State(state): State<ApiState>) -> impl IntoResponse {
    let mut statuses = Vec::with_capacity(state.pools.len());
    for handle in state.pools.values() {
        statuses.push(handle.status().await);
    }
    ApiResponse::ok(statuses)
}

/// GET /api/v1/pools/{name}
pub async fn get_pool(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match lookup(&state, &name) {
        Some(handle) => ApiResponse::ok(handle.status().await).into_response(),
        None => pool_not_found(),
    }
}

/// GET /api/v1/pools/{name}/targets
pub async fn list_targets(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match lookup(&state, &name) {
        Some(handle) => ApiResponse::ok(handle.targets.targets()).into_response(),
        None => pool_not_found(),
    }
}

// ── Activities ─────────────────────────────────────────────────

#[derive(serde::Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

const DEFAULT_ACTIVITY_LIMIT: usize = 50;

/// GET /api/v1/pools/{name}/activities?limit=N
pub async fn list_activities(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &name) else {
        return pool_not_found();
    };
    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT);
    match handle.store.list_activities(&name, limit) {
        Ok(activities) => ApiResponse::ok(activities).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Scaling ────────────────────────────────────────────────────

/// Resize request body.
#[derive(serde::Deserialize)]
pub struct ResizeRequest {
    pub delta: i32,
}

#[derive(serde::Serialize)]
struct ResizeResponse {
    launched: Vec<InstanceId>,
    drained: Vec<DrainReport>,
    desired_capacity: u32,
}

fn status_for(err: &PoolError) -> StatusCode {
    match err {
        PoolError::ResizeInProgress(_) => StatusCode::CONFLICT,
        e if e.is_bounds_violation() => StatusCode::UNPROCESSABLE_ENTITY,
        PoolError::ProvisioningFailure { .. } => StatusCode::BAD_GATEWAY,
        PoolError::UnknownInstance(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /api/v1/pools/{name}/resize
///
/// Runs the resize to completion, including any drains.
pub async fn resize_pool(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<ResizeRequest>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &name) else {
        return pool_not_found();
    };
    info!(pool = %name, delta = req.delta, "manual resize requested");
    match handle.resize(req.delta, epoch_secs()).await {
        Ok(outcome) => ApiResponse::ok(ResizeResponse {
            launched: outcome.launched,
            drained: outcome.drained,
            desired_capacity: handle.manager.snapshot().await.desired_capacity,
        })
        .into_response(),
        Err(e) => error_response(&e.to_string(), status_for(&e)).into_response(),
    }
}

// ── Samples ────────────────────────────────────────────────────

/// Utilization sample body. The timestamp defaults to the receive time.
#[derive(serde::Deserialize)]
pub struct SampleRequest {
    pub instance_id: InstanceId,
    pub utilization: f64,
    pub timestamp: Option<u64>,
}

/// How far ahead of the server clock a pushed sample may be stamped.
const MAX_SAMPLE_SKEW_SECS: u64 = 60;

/// POST /api/v1/pools/{name}/samples
pub async fn push_sample(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<SampleRequest>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &name) else {
        return pool_not_found();
    };
    if !req.utilization.is_finite() || req.utilization < 0.0 {
        return error_response(
            "utilization must be a non-negative number",
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }
    let now = epoch_secs();
    let timestamp = req.timestamp.unwrap_or(now);
    if timestamp > now.saturating_add(MAX_SAMPLE_SKEW_SECS) {
        return error_response("timestamp is in the future", StatusCode::BAD_REQUEST)
            .into_response();
    }
    let sample = MetricSample {
        instance_id: req.instance_id,
        timestamp,
        utilization: req.utilization,
    };
    handle.push_sample(sample).await;
    (StatusCode::ACCEPTED, ApiResponse::ok("accepted")).into_response()
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let mut statuses = Vec::with_capacity(state.pools.len());
    for handle in state.pools.values() {
        statuses.push(handle.status().await);
    }

    let body = autopool_metrics::render_prometheus(&statuses);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use autopool_controller::{PoolController, PoolRuntime};
    use autopool_core::PoolConfig;
    use autopool_core::backend::BackendFuture;
    use autopool_pool::StaticInventory;
    use autopool_state::StateStore;
    use autopool_traffic::{HealthProbe, ProbeResult};

    struct AlwaysHealthy;

    impl HealthProbe for AlwaysHealthy {
        fn probe<'a>(&'a self, _endpoint: &'a str) -> BackendFuture<'a, ProbeResult> {
            Box::pin(async { ProbeResult::Healthy })
        }
    }

    async fn test_state(addresses: usize) -> (ApiState, PoolController) {
        let mut config = PoolConfig::with_defaults("web");
        config.healthy_threshold = 1;
        config.max_size = 3;
        let hosts = (1..=addresses).map(|i| format!("10.0.0.{i}")).collect();
        let runtime = PoolRuntime::build_with_probe(
            config,
            Arc::new(StaticInventory::new(hosts)),
            Arc::new(AlwaysHealthy),
            StateStore::open_in_memory().unwrap(),
            1000,
        )
        .await
        .unwrap();
        (ApiState::new([runtime.handle]), runtime.controller)
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_pools_reports_each_pool() {
        let (state, mut controller) = test_state(2).await;
        controller.tick(1000).await;

        let resp = list_pools(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"][0]["snapshot"]["name"], "web");
        assert_eq!(json["data"][0]["snapshot"]["instances"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_unknown_pool_is_404() {
        let (state, _controller) = test_state(1).await;
        let resp = get_pool(State(state), Path("nope".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"], "pool not found");
    }

    #[tokio::test]
    async fn targets_show_health() {
        let (state, mut controller) = test_state(1).await;
        controller.tick(1000).await;
        controller.tick(1030).await;

        let resp = list_targets(State(state), Path("web".to_string())).await.into_response();
        let json = body_json(resp).await;
        assert_eq!(json["data"][0]["health"], "healthy");
        assert_eq!(json["data"][0]["endpoint"], "10.0.0.1:8000");
    }

    #[tokio::test]
    async fn resize_within_bounds_launches() {
        let (state, mut controller) = test_state(3).await;
        controller.tick(1000).await;

        let resp = resize_pool(
            State(state.clone()),
            Path("web".to_string()),
            Json(ResizeRequest { delta: 2 }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"]["launched"].as_array().unwrap().len(), 2);
        assert_eq!(json["data"]["desired_capacity"], 3);

        let resp = list_activities(
            State(state),
            Path("web".to_string()),
            Query(ActivityQuery { limit: None }),
        )
        .await
        .into_response();
        let json = body_json(resp).await;
        let last = json["data"].as_array().unwrap().last().unwrap().clone();
        assert_eq!(last["cause"], "manual");
        assert_eq!(last["status"], "successful");
    }

    #[tokio::test]
    async fn resize_past_max_is_422() {
        let (state, mut controller) = test_state(3).await;
        controller.tick(1000).await;

        let req = Json(ResizeRequest { delta: 3 });
        let resp = resize_pool(State(state), Path("web".to_string()), req)
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn resize_without_hosts_is_502() {
        let (state, _controller) = test_state(0).await;
        let req = Json(ResizeRequest { delta: 1 });
        let resp = resize_pool(State(state), Path("web".to_string()), req)
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn resize_in_progress_is_409() {
        assert_eq!(status_for(&PoolError::ResizeInProgress("web".into())), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn samples_are_queued_for_the_controller() {
        let (state, _controller) = test_state(1).await;
        let handle = state.pools["web"].clone();

        let req = SampleRequest {
            instance_id: "i-00000001".to_string(),
            utilization: 42.5,
            timestamp: Some(1010),
        };
        let resp = push_sample(State(state.clone()), Path("web".to_string()), Json(req))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(handle.metrics.pending().await, 1);

        let bad = SampleRequest {
            instance_id: "i-00000001".to_string(),
            utilization: f64::NAN,
            timestamp: None,
        };
        let resp = push_sample(State(state.clone()), Path("web".to_string()), Json(bad))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let future = SampleRequest {
            instance_id: "i-00000001".to_string(),
            utilization: 10.0,
            timestamp: Some(epoch_secs() + 86_400),
        };
        let resp = push_sample(State(state), Path("web".to_string()), Json(future))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "timestamp is in the future");
        assert_eq!(handle.metrics.pending().await, 1);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let (state, mut controller) = test_state(1).await;
        controller.tick(1000).await;

        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("autopool_desired_capacity{pool=\"web\"} 1"));
    }
}
