//! Probe and dependency endpoints.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::health::{checks::probe_tcp, CheckFilter, HealthStatus, SystemHealth};
use crate::http::server::AppState;

/// `GET /health`: process liveness, always 200.
pub async fn liveness(State(state): State<AppState>) -> Json<SystemHealth> {
    Json(state.health.liveness())
}

#[derive(Debug, Default, Deserialize)]
pub struct ReadinessQuery {
    #[serde(default)]
    pub detailed: bool,
}

/// `GET /ready`: 200 only when ready and not UNHEALTHY.
pub async fn readiness(
    State(state): State<AppState>,
    Query(query): Query<ReadinessQuery>,
) -> (StatusCode, Json<SystemHealth>) {
    let report = state.health.readiness_report(query.detailed).await;
    let code = if report.ready && report.status != HealthStatus::Unhealthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

/// `GET /health/detailed`: every component, always 200.
pub async fn detailed_health(State(state): State<AppState>) -> Json<SystemHealth> {
    Json(state.health.check_all(&CheckFilter::All).await)
}

#[derive(Debug, Serialize)]
pub struct PingResult {
    pub dependency: String,
    pub address: String,
    pub latency_ms: f64,
}

/// `POST /api/v1/dependencies/{name}/ping`: TCP round-trip through the
/// breaker, retry policy and any active fault scenarios.
pub async fn ping_dependency(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let config = state.config.load_full();
    let Some(dep) = config.dependency(&name) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "status": "error",
                "detail": format!("unknown dependency '{name}'"),
                "error_type": "NotFound",
            })),
        )
            .into_response();
    };

    let address = dep.address.as_str();
    let timeout = Duration::from_millis(dep.check_timeout_ms);
    match state.guard.call(&name, || probe_tcp(address, timeout)).await {
        Ok(latency) => {
            tracing::debug!(dependency = %name, latency_ms = latency.as_millis() as u64, "Ping succeeded");
            Json(PingResult {
                dependency: name.clone(),
                address: dep.address.clone(),
                latency_ms: latency.as_secs_f64() * 1000.0,
            })
            .into_response()
        }
        Err(e) => {
            tracing::warn!(dependency = %name, error = %e, "Ping failed");
            e.into_response()
        }
    }
}
