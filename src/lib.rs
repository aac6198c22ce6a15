//! Ingestion-guard: resilience layer for an event ingestion service.
//!
//! Retries with backoff, per-dependency circuit breakers, token-bucket rate
//! limiting, aggregated health, graceful shutdown, fault injection and a
//! redacting audit trail, behind an Axum HTTP front end.

pub mod admin;
pub mod audit;
pub mod config;
pub mod error;
pub mod faults;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::ServiceConfig;
pub use error::{ErrorKind, ServiceError};
pub use http::HttpServer;
pub use lifecycle::{bootstrap, Service};
