//! Request-side plumbing.
//!
//! # Responsibilities
//! - Name the correlation header shared by tracing, audit and responses
//! - Count in-flight guarded requests against the shutdown coordinator
//!
//! # Design Decisions
//! - Request ID is set as early as possible (outermost layer) for tracing
//! - Probe and control paths are never counted or refused so orchestrators
//!   can still observe a draining instance

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::lifecycle::ShutdownCoordinator;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Paths that bypass in-flight tracking.
const UNTRACKED_PREFIXES: &[&str] = &["/health", "/ready", "/metrics", "/admin", "/config"];

/// Correlation ID of a request, if one was assigned.
pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn is_tracked(path: &str) -> bool {
    !UNTRACKED_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Refuse new work while draining; otherwise hold an in-flight guard for
/// the lifetime of the request.
pub async fn track_inflight(
    State(shutdown): State<Arc<ShutdownCoordinator>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !is_tracked(request.uri().path()) {
        return next.run(request).await;
    }

    match shutdown.begin_operation() {
        Ok(_guard) => next.run(request).await,
        Err(e) => {
            tracing::debug!(
                path = %request.uri().path(),
                request_id = ?request_id(request.headers()),
                "Refusing request during shutdown"
            );
            e.into_response()
        }
    }
}
