//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → exempt path? (health, readiness, metrics) → pass
//!     → rate_limit.rs (bucket key per strategy, take a token)
//!     → allowed: handler, then X-RateLimit-* headers
//!     → denied: 429 + audit event
//! ```
//!
//! # Design Decisions
//! - Fail closed: a denied request never reaches a handler
//! - No trust in client input beyond the first X-Forwarded-For hop

pub mod rate_limit;

pub use rate_limit::{rate_limit_middleware, RateLimitInfo, RateLimiter};
