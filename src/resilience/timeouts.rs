//! Timeout enforcement.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the inner future is dropped on expiry
//! - Timeout errors are `Transient { kind: Timeout }` so retry policies and
//!   breakers treat them like any other transient failure

use std::future::Future;
use std::time::Duration;

use crate::error::ServiceError;

/// Run `future` with a deadline.
pub async fn with_timeout<F, T>(what: &str, limit: Duration, future: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::timeout(format!(
            "{what} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
