//! HTTP surface tests, driving the router in-process with `oneshot`.

use axum::http::StatusCode;
use axum::Router;
use ingest_guard::config::{KeyStrategy, ServiceConfig};
use ingest_guard::http::{build_router, AppState};
use ingest_guard::lifecycle::{ControlEvent, ControlSource};
use serde_json::json;
use tower::ServiceExt;

mod common;

fn router(h: &common::Harness) -> Router {
    build_router(AppState::from(&h.service))
}

#[tokio::test]
async fn test_liveness_always_ok() {
    let h = common::harness(common::test_config(Vec::new()));
    h.service.health.readiness().set_ready(false);

    let response = router(&h).oneshot(common::request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = common::body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "ingest-guard");
}

#[tokio::test]
async fn test_readiness_follows_dependencies_and_flag() {
    let datastore = common::start_mock_dependency().await;
    let h = common::harness(common::test_config(vec![common::dependency("datastore", datastore.addr, true)]));
    let app = router(&h);

    let response = app.clone().oneshot(common::request("GET", "/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    assert!(body.get("components").is_none());

    let response = app
        .clone()
        .oneshot(common::request("GET", "/ready?detailed=true"))
        .await
        .unwrap();
    let body = common::body_json(response).await;
    assert_eq!(body["components"]["datastore"]["status"], "healthy");

    h.service.health.readiness().set_ready(false);
    let response = app.oneshot(common::request("GET", "/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(common::body_json(response).await["status"], "unhealthy");
}

#[tokio::test]
async fn test_readiness_unavailable_when_required_dependency_down() {
    let down = common::refused_address().await;
    let h = common::harness(common::test_config(vec![common::dependency("broker", down, true)]));

    let response = router(&h).oneshot(common::request("GET", "/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = router(&h).oneshot(common::request("GET", "/health/detailed")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["components"]["broker"]["status"], "unhealthy");
}

#[tokio::test]
async fn test_ping_through_guard() {
    let broker = common::start_mock_dependency().await;
    let h = common::harness(common::test_config(vec![common::dependency("broker", broker.addr, true)]));
    let app = router(&h);

    let response = app
        .clone()
        .oneshot(common::request("POST", "/api/v1/dependencies/broker/ping"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-ratelimit-remaining"));
    assert_eq!(common::body_json(response).await["dependency"], "broker");

    let response = app
        .oneshot(common::request("POST", "/api/v1/dependencies/nope/ping"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rate_limit_denial() {
    let mut config = common::test_config(Vec::new());
    config.rate_limit.requests_per_window = 2;
    config.rate_limit.window_secs = 60;
    let h = common::harness(config);
    let app = router(&h);

    for expected in ["1", "0"] {
        let response = app
            .clone()
            .oneshot(common::request("POST", "/api/v1/dependencies/any/ping"))
            .await
            .unwrap();
        assert_eq!(response.headers()["x-ratelimit-remaining"], expected);
    }

    let response = app
        .clone()
        .oneshot(common::request("POST", "/api/v1/dependencies/any/ping"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-limit"], "2");
    let body = common::body_json(response).await;
    assert_eq!(body["status"], "rate_limited");
    assert_eq!(body["remaining"], 0);
    assert_eq!(h.audit.with_action("rate_limit.denied").len(), 1);

    // probe paths are exempt
    let response = app.oneshot(common::request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_credential_denial_never_exposes_client_key() {
    let mut config = common::test_config(Vec::new());
    config.rate_limit.requests_per_window = 1;
    config.rate_limit.key_strategy = KeyStrategy::Credential;
    let h = common::harness(config);
    let app = router(&h);

    let keyed = || {
        axum::http::Request::builder()
            .method("POST")
            .uri("/api/v1/dependencies/any/ping")
            .header("x-api-key", "client-secret-9876")
            .body(axum::body::Body::empty())
            .unwrap()
    };
    app.clone().oneshot(keyed()).await.unwrap();
    let response = app.oneshot(keyed()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = common::body_json(response).await.to_string();
    assert!(!body.contains("secret-9876"));
    let denials = h.audit.with_action("rate_limit.denied");
    assert_eq!(denials.len(), 1);
    assert!(!denials[0].to_string().contains("secret-9876"));
}

#[tokio::test]
async fn test_admin_requires_key() {
    let h = common::harness(common::test_config(Vec::new()));
    let app = router(&h);

    let response = app
        .clone()
        .oneshot(common::request("GET", "/admin/circuits"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.audit.with_action("auth.failure").len(), 1);

    let request = axum::http::Request::builder()
        .uri("/admin/circuits")
        .header("authorization", format!("Bearer {}", common::ADMIN_KEY))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_disabled_without_keys() {
    let h = common::harness(ServiceConfig::default());
    let response = router(&h)
        .oneshot(common::admin_request("GET", "/admin/circuits"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_forced_open_circuit_fails_fast() {
    let broker = common::start_mock_dependency().await;
    let h = common::harness(common::test_config(vec![common::dependency("broker", broker.addr, true)]));
    let app = router(&h);

    let response = app
        .clone()
        .oneshot(common::admin_request("POST", "/admin/circuits/broker/open"))
        .await
        .unwrap();
    assert_eq!(common::body_json(response).await["state"], "open");

    let response = app
        .clone()
        .oneshot(common::request("POST", "/api/v1/dependencies/broker/ping"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(common::body_json(response).await["error_type"], "CircuitOpenError");
    assert_eq!(broker.connections(), 0);

    let response = app
        .clone()
        .oneshot(common::admin_request("POST", "/admin/circuits/broker/close"))
        .await
        .unwrap();
    assert_eq!(common::body_json(response).await["state"], "closed");

    let response = app
        .oneshot(common::admin_request("POST", "/admin/circuits/unknown/open"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_fault_injection_lifecycle() {
    let mut config = common::test_config(Vec::new());
    let h_disabled = common::harness(config.clone());
    let response = router(&h_disabled)
        .oneshot(common::admin_json("POST", "/admin/faults", json!({ "preset": "broker_outage" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    config.admin.fault_injection_enabled = true;
    let h = common::harness(config);
    let app = router(&h);

    let response = app
        .clone()
        .oneshot(common::admin_json("POST", "/admin/faults", json!({ "preset": "no_such_preset" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(common::admin_json(
            "POST",
            "/admin/faults",
            json!({
                "preset": "broker_outage",
                "scenarios": [{
                    "name": "slow cache",
                    "target": "cache",
                    "effect": { "type": "latency", "delay_ms": 10 }
                }],
                "duration_secs": 30
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(common::body_json(response).await["activated"].as_array().unwrap().len(), 2);

    let response = app
        .clone()
        .oneshot(common::admin_request("GET", "/admin/faults"))
        .await
        .unwrap();
    assert_eq!(common::body_json(response).await.as_array().unwrap().len(), 2);

    let response = app
        .oneshot(common::admin_request("DELETE", "/admin/faults"))
        .await
        .unwrap();
    assert_eq!(common::body_json(response).await["cleared"], 2);
    assert!(h.service.faults.is_empty());
}

#[tokio::test]
async fn test_reload_without_file_is_unchanged_and_redacted() {
    let h = common::harness(common::test_config(Vec::new()));
    let response = router(&h)
        .oneshot(common::admin_request("POST", "/config/reload"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    assert_eq!(body["status"], "unchanged");
    assert_eq!(body["config"]["admin"]["api_keys"], "***REDACTED***");
}

#[tokio::test]
async fn test_shutdown_endpoint_and_draining() {
    let mut h = common::harness(common::test_config(Vec::new()));
    let app = router(&h);

    let response = app
        .clone()
        .oneshot(common::admin_request("POST", "/admin/shutdown"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        h.control_rx.recv().await,
        Some(ControlEvent::Shutdown { source: ControlSource::Api })
    );

    let shutdown = h.service.shutdown.clone();
    let _inflight = shutdown.begin_operation().unwrap();
    let task = tokio::spawn(async move { shutdown.shutdown(ControlSource::Api).await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let response = app
        .clone()
        .oneshot(common::request("POST", "/api/v1/dependencies/any/ping"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(common::body_json(response).await["error_type"], "ShutdownInProgress");

    let response = app.oneshot(common::request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    drop(_inflight);
    assert!(task.await.unwrap().unwrap().drained);
}
