//! Router-level tests: routes, extractors, and status codes through the
//! full axum stack.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use autopool_api::{ApiState, build_router};
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

async fn test_router() -> (Router, PoolController) {
    let mut config = PoolConfig::with_defaults("web");
    config.max_size = 3;
    let runtime = PoolRuntime::build_with_probe(
        config,
        Arc::new(StaticInventory::new(vec!["10.0.0.1".into(), "10.0.0.2".into()])),
        Arc::new(AlwaysHealthy),
        StateStore::open_in_memory().unwrap(),
        1000,
    )
    .await
    .unwrap();
    (build_router(ApiState::new([runtime.handle])), runtime.controller)
}

async fn json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn list_pools() {
    let (router, _controller) = test_router().await;

    let req = Request::builder().uri("/api/v1/pools").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["data"][0]["snapshot"]["name"], "web");
    assert_eq!(body["data"][0]["snapshot"]["desired_capacity"], 1);
}

#[tokio::test]
async fn unknown_pool_is_404() {
    let (router, _controller) = test_router().await;

    let req = Request::builder().uri("/api/v1/pools/nope/targets").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn resize_then_read_activities() {
    let (router, mut controller) = test_router().await;
    controller.tick(1000).await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/pools/web/resize")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"delta":1}"#))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Inventory has two hosts, both allocated now.
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/pools/web/resize")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"delta":1}"#))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let req = Request::builder()
        .uri("/api/v1/pools/web/activities?limit=2")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    let body = json(resp).await;
    let statuses: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["successful", "failed"]);
}

#[tokio::test]
async fn malformed_sample_is_rejected() {
    let (router, _controller) = test_router().await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/pools/web/samples")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"instance_id":"i-00000001"}"#))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn metrics_endpoint() {
    let (router, mut controller) = test_router().await;
    controller.tick(1000).await;

    let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("autopool_instances{pool=\"web\",state=\"pending\"} 1"));
}
