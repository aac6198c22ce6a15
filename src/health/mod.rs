//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Checks (checks.rs):
//!     SelfCheck, TcpProbeCheck, BreakerCheck, FnCheck
//!     → implement HealthCheck
//!
//! Aggregation (aggregator.rs):
//!     register(check, required, timeout)
//!     → check_all(filter) runs every check concurrently, each under its own timeout
//!     → overall status from required/optional weighting
//!     → Readiness flag (flipped by the shutdown coordinator) gates /ready
//!
//! Dependency checks (dependencies.rs):
//!     [[dependencies]] → TcpProbeCheck + BreakerCheck, re-synced on reload
//! ```
//!
//! # Design Decisions
//! - A failing, hanging or panicking check only marks its own component UNHEALTHY
//! - Liveness never touches dependencies
//! - Readiness flips to not-ready the moment draining starts

pub mod aggregator;
pub mod checks;
pub mod dependencies;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub use aggregator::{CheckFilter, HealthAggregator};
pub use checks::{BreakerCheck, FnCheck, HealthCheck, SelfCheck, TcpProbeCheck};
pub use dependencies::DependencyChecks;

/// Health status levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    /// Gauge value: 1 healthy, 0.5 degraded, 0 unhealthy.
    pub fn as_gauge(self) -> f64 {
        match self {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Degraded => 0.5,
            HealthStatus::Unhealthy => 0.0,
        }
    }
}

/// Health status for a single component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: Some(message.into()),
            checked_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn healthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Healthy, message)
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Degraded, message)
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Unhealthy, message)
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Overall system health status.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub service: String,
    pub version: &'static str,
    pub ready: bool,
    pub checked_at: DateTime<Utc>,
    pub uptime_seconds: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ComponentHealth>,
}

impl SystemHealth {
    /// Drop per-component detail (non-detailed readiness view).
    pub fn summary(mut self) -> Self {
        self.components.clear();
        self
    }
}

/// Shared not-ready flag: written by the shutdown coordinator, read by health.
#[derive(Debug, Clone)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}
