use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;

use crate::error::ServiceError;
use crate::http::request::request_id;
use crate::http::server::AppState;
use crate::security::rate_limit::client_address;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Credential from `X-API-Key`, else `Authorization: Bearer <key>`.
pub fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|h| h.to_str().ok()) {
        return Some(key);
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let keys = state.config.load().admin.api_keys.clone();
    if keys.is_empty() {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "status": "error",
                "detail": "admin API disabled: no api keys configured",
                "error_type": "Forbidden",
            })),
        )
            .into_response();
    }

    let reason = match presented_key(request.headers()) {
        Some(key) if keys.iter().any(|k| k == key) => None,
        Some(_) => Some("invalid api key"),
        None => Some("missing api key"),
    };
    let Some(reason) = reason else {
        return next.run(request).await;
    };

    let headers = request.headers();

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let actor = presented_key(headers)
        .map(|k| format!("key:{}", k.chars().take(4).collect::<String>()))
        .unwrap_or_else(|| "anonymous".to_string());
    tracing::warn!(path = %request.uri().path(), reason, "Admin authentication failed");
    state
        .audit
        .auth_failure(&actor, reason, client_address(headers, peer), request_id(headers));

    ServiceError::unauthorized(reason).into_response()
}
