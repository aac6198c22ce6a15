//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and gauges via the `metrics` facade)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Prometheus scrape endpoint, when enabled
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through HTTP logs and audit events
//! - Metric updates are fire-and-forget; with no recorder installed they are no-ops

pub mod logging;
pub mod metrics;
