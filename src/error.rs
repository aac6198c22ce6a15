//! Error taxonomy shared by every subsystem.
//!
//! # Design Decisions
//! - One typed error crosses every seam (retry, breaker, limiter, shutdown)
//! - `ErrorKind` is the classification key used by retry policies and
//!   breaker "expected error" sets; it is configurable by name in TOML
//! - The HTTP layer maps each variant to a distinct status (see `http::response`)

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::security::rate_limit::RateLimitInfo;

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    Unavailable,
    InvalidInput,
    Unauthorized,
    CircuitOpen,
    RateLimited,
    RetryExhausted,
    ShuttingDown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::RetryExhausted => "retry_exhausted",
            ErrorKind::ShuttingDown => "shutting_down",
        }
    }

    /// Kinds that describe a dependency hiccup rather than a bad request.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Connection | ErrorKind::Unavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed outcome of any guarded operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// Retryable failure: timeouts, connection resets, temporary unavailability.
    #[error("transient failure ({kind}): {message}")]
    Transient { kind: ErrorKind, message: String },

    /// Non-retryable failure: malformed input, authentication failure.
    #[error("permanent failure ({kind}): {message}")]
    Permanent { kind: ErrorKind, message: String },

    /// Fast-fail: the dependency is presumed down.
    #[error("circuit open for dependency '{dependency}'")]
    CircuitOpen {
        dependency: String,
        retry_after: Duration,
    },

    /// Admission denied by the rate limiter.
    #[error("rate limit exceeded for '{key}'")]
    RateLimitExceeded { key: String, info: RateLimitInfo },

    /// Retry budget spent; wraps the last failure.
    #[error("retries exhausted after {attempts} attempts in {elapsed:?}: {last}")]
    RetryExhausted {
        attempts: u32,
        elapsed: Duration,
        #[source]
        last: Box<ServiceError>,
    },

    /// New work refused while the service drains.
    #[error("shutdown in progress")]
    ShutdownInProgress,
}

impl ServiceError {
    pub fn transient(kind: ErrorKind, message: impl Into<String>) -> Self {
        ServiceError::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn permanent(kind: ErrorKind, message: impl Into<String>) -> Self {
        ServiceError::Permanent {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::transient(ErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::transient(ErrorKind::Connection, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::permanent(ErrorKind::InvalidInput, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::permanent(ErrorKind::Unauthorized, message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Transient { kind, .. } | ServiceError::Permanent { kind, .. } => *kind,
            ServiceError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ServiceError::RateLimitExceeded { .. } => ErrorKind::RateLimited,
            ServiceError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            ServiceError::ShutdownInProgress => ErrorKind::ShuttingDown,
        }
    }

    /// Stable name of the variant, surfaced to HTTP clients as `error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            ServiceError::Transient { .. } => "TransientError",
            ServiceError::Permanent { .. } => "PermanentError",
            ServiceError::CircuitOpen { .. } => "CircuitOpenError",
            ServiceError::RateLimitExceeded { .. } => "RateLimitExceeded",
            ServiceError::RetryExhausted { .. } => "RetryExhausted",
            ServiceError::ShutdownInProgress => "ShutdownInProgress",
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::TimedOut | Io::WouldBlock => ServiceError::timeout(err.to_string()),
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::BrokenPipe
            | Io::UnexpectedEof => ServiceError::connection(err.to_string()),
            Io::InvalidInput | Io::InvalidData => ServiceError::invalid_input(err.to_string()),
            Io::PermissionDenied => ServiceError::unauthorized(err.to_string()),
            _ => ServiceError::transient(ErrorKind::Unavailable, err.to_string()),
        }
    }
}
