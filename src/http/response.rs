//! Mapping of `ServiceError` onto HTTP responses.
//!
//! | Variant              | Status | Extra headers          |
//! |----------------------|--------|------------------------|
//! | `Transient`          | 503    |                        |
//! | `Permanent`          | 400 / 401 (unauthorized)        |
//! | `CircuitOpen`        | 503    | `Retry-After`          |
//! | `RateLimitExceeded`  | 429    | `X-RateLimit-*`        |
//! | `RetryExhausted`     | 502    |                        |
//! | `ShutdownInProgress` | 503    |                        |
//!
//! Every body is JSON and carries `error_type`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::{ErrorKind, ServiceError};

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Transient { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Permanent { kind: ErrorKind::Unauthorized, .. } => StatusCode::UNAUTHORIZED,
            ServiceError::Permanent { .. } => StatusCode::BAD_REQUEST,
            ServiceError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::RetryExhausted { .. } => StatusCode::BAD_GATEWAY,
            ServiceError::ShutdownInProgress => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();

        match &self {
            ServiceError::RateLimitExceeded { info, .. } => {
                let body = json!({
                    "status": "rate_limited",
                    "detail": "Rate limit exceeded",
                    "limit": info.limit,
                    "remaining": info.remaining,
                    "reset": info.reset,
                    "error_type": error_type,
                });
                let mut response = (status, Json(body)).into_response();
                info.apply_headers(response.headers_mut());
                response
            }
            ServiceError::CircuitOpen { dependency, retry_after } => {
                let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
                let body = json!({
                    "status": "error",
                    "detail": self.to_string(),
                    "dependency": dependency,
                    "retry_after_secs": secs,
                    "error_type": error_type,
                });
                let mut response = (status, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                response
            }
            ServiceError::RetryExhausted { attempts, last, .. } => {
                let body = json!({
                    "status": "error",
                    "detail": self.to_string(),
                    "attempts": attempts,
                    "last_error_type": last.error_type(),
                    "error_type": error_type,
                });
                (status, Json(body)).into_response()
            }
            _ => {
                let body = json!({
                    "status": "error",
                    "detail": self.to_string(),
                    "kind": self.kind().as_str(),
                    "error_type": error_type,
                });
                (status, Json(body)).into_response()
            }
        }
    }
}
