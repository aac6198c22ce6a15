//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency (guard.rs):
//!     → retries.rs (attempt loop with backoff.rs delays until success, abort or exhaustion)
//!     → registry.rs (lookup-or-create breaker for the dependency)
//!     → circuit_breaker.rs (admit each attempt, or fail fast with CircuitOpen)
//!     → timeouts.rs (deadline for individual probes and pings)
//!     → outcome recorded by the breaker, audited and counted
//! ```
//!
//! # Design Decisions
//! - Each retry attempt is a separate breaker admission; the breaker sees every outcome
//! - Only the configured error kinds affect breaker state or trigger retries
//! - Circuit breaker prevents cascading failures

pub mod backoff;
pub mod circuit_breaker;
pub mod guard;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use guard::DependencyGuard;
pub use registry::BreakerRegistry;
pub use retries::{RetryExecutor, RetryPolicy};
pub use timeouts::with_timeout;
