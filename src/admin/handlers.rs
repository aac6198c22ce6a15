use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::faults::{scenario, ActiveFault, FaultScenario};
use crate::http::server::AppState;
use crate::lifecycle::{ControlEvent, ControlSource};
use crate::resilience::{BreakerSnapshot, CircuitBreaker};

fn error_body(status: StatusCode, error_type: &str, detail: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "status": "error",
            "detail": detail.into(),
            "error_type": error_type,
        })),
    )
        .into_response()
}

// Breakers exist for configured dependencies and for anything called so far.
fn lookup_breaker(state: &AppState, name: &str) -> Option<Arc<CircuitBreaker>> {
    let breakers = state.guard.breakers();
    breakers.get(name).or_else(|| {
        state
            .config
            .load()
            .dependency(name)
            .map(|_| breakers.get_or_create(name))
    })
}

pub async fn list_circuits(State(state): State<AppState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.guard.breakers().snapshots())
}

pub async fn open_circuit(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match lookup_breaker(&state, &name) {
        Some(breaker) => {
            breaker.force_open();
            Json(breaker.snapshot()).into_response()
        }
        None => error_body(StatusCode::NOT_FOUND, "NotFound", format!("unknown circuit '{name}'")),
    }
}

pub async fn close_circuit(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match lookup_breaker(&state, &name) {
        Some(breaker) => {
            breaker.force_closed();
            Json(breaker.snapshot()).into_response()
        }
        None => error_body(StatusCode::NOT_FOUND, "NotFound", format!("unknown circuit '{name}'")),
    }
}

pub async fn list_faults(State(state): State<AppState>) -> Json<Vec<ActiveFault>> {
    Json(state.guard.faults().active())
}

fn default_fault_duration() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
pub struct InjectFaults {
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub scenarios: Vec<FaultScenario>,
    #[serde(default = "default_fault_duration")]
    pub duration_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct InjectedFaults {
    pub activated: Vec<Uuid>,
    pub duration_secs: u64,
}

pub async fn inject_faults(State(state): State<AppState>, Json(request): Json<InjectFaults>) -> Response {
    if !state.config.load().admin.fault_injection_enabled {
        return error_body(
            StatusCode::FORBIDDEN,
            "Forbidden",
            "fault injection is disabled (admin.fault_injection_enabled = false)",
        );
    }
    if request.duration_secs == 0 {
        return error_body(StatusCode::BAD_REQUEST, "InvalidInput", "duration_secs must be positive");
    }

    let mut scenarios = request.scenarios;
    if let Some(name) = &request.preset {
        match scenario::preset(name) {
            Some(preset) => scenarios.extend(preset),
            None => {
                return error_body(StatusCode::BAD_REQUEST, "InvalidInput", format!("unknown preset '{name}'"))
            }
        }
    }
    if scenarios.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "InvalidInput", "no scenarios given");
    }
    for s in &scenarios {
        if let Err(reason) = s.validate() {
            return error_body(StatusCode::BAD_REQUEST, "InvalidInput", format!("scenario '{}': {reason}", s.name));
        }
    }

    let activated = state
        .guard
        .faults()
        .activate_for(scenarios, Duration::from_secs(request.duration_secs));
    (
        StatusCode::CREATED,
        Json(InjectedFaults {
            activated,
            duration_secs: request.duration_secs,
        }),
    )
        .into_response()
}

pub async fn clear_faults(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.guard.faults().clear();
    Json(json!({ "cleared": cleared }))
}

pub async fn request_shutdown(State(state): State<AppState>) -> Response {
    let event = ControlEvent::Shutdown { source: ControlSource::Api };
    match state.control_tx.send(event) {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "status": "shutting_down" }))).into_response(),
        Err(_) => error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            "ShutdownInProgress",
            "control loop is not running",
        ),
    }
}

/// `POST /config/reload`: reload synchronously and report the effective config.
pub async fn reload_config(State(state): State<AppState>) -> Response {
    let reloader = state.reloader.clone();
    match tokio::task::spawn_blocking(move || reloader.reload(ControlSource::Api)).await {
        Ok(Ok(outcome)) => Json(outcome).into_response(),
        Ok(Err(e)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "failed",
                "detail": e.to_string(),
                "error_type": "ConfigError",
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Config reload task failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", "reload task failed")
        }
    }
}
