//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID, in-flight tracking, refuse while draining)
//!     → security::rate_limit (token bucket per client key)
//!     → handlers.rs (probes, dependency ping) | admin (operator API)
//!     → response.rs (ServiceError → status + JSON body)
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::REQUEST_ID_HEADER;
pub use server::{build_router, AppState, HttpServer};
