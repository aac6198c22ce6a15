//! Registry of named checks composed into one status.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;

use crate::health::checks::HealthCheck;
use crate::health::{ComponentHealth, HealthStatus, Readiness, SystemHealth};
use crate::observability::metrics;

/// Which registered checks to run.
#[derive(Debug, Clone, Default)]
pub enum CheckFilter {
    #[default]
    All,
    RequiredOnly,
    Names(Vec<String>),
}

struct Registered {
    check: Arc<dyn HealthCheck>,
    required: bool,
    timeout: Duration,
}

pub struct HealthAggregator {
    checks: RwLock<BTreeMap<String, Registered>>,
    readiness: Readiness,
    service_name: String,
    default_timeout: Duration,
    started: Instant,
}

impl HealthAggregator {
    pub fn new(service_name: impl Into<String>, default_timeout: Duration, readiness: Readiness) -> Self {
        Self {
            checks: RwLock::new(BTreeMap::new()),
            readiness,
            service_name: service_name.into(),
            default_timeout,
            started: Instant::now(),
        }
    }

    /// Register (or replace) a check under its own name.
    pub fn register(&self, check: Arc<dyn HealthCheck>, required: bool, timeout: Option<Duration>) {
        let name = check.name().to_string();
        let timeout = timeout.unwrap_or(self.default_timeout);
        tracing::debug!(component = %name, required, timeout_ms = timeout.as_millis() as u64, "Registered health check");
        self.checks
            .write()
            .expect("health registry lock poisoned")
            .insert(
                name,
                Registered {
                    check,
                    required,
                    timeout,
                },
            );
    }

    /// Remove a check; returns whether it was registered.
    pub fn deregister(&self, name: &str) -> bool {
        let removed = self
            .checks
            .write()
            .expect("health registry lock poisoned")
            .remove(name)
            .is_some();
        if removed {
            tracing::debug!(component = %name, "Deregistered health check");
        }
        removed
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn component_names(&self) -> Vec<String> {
        self.checks
            .read()
            .expect("health registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Run the selected checks concurrently, each under its own timeout.
    pub async fn check_all(&self, filter: &CheckFilter) -> SystemHealth {
        let selected: Vec<(String, Arc<dyn HealthCheck>, bool, Duration)> = {
            let checks = self.checks.read().expect("health registry lock poisoned");
            checks
                .iter()
                .filter(|(name, reg)| match filter {
                    CheckFilter::All => true,
                    CheckFilter::RequiredOnly => reg.required,
                    CheckFilter::Names(names) => names.iter().any(|n| n == *name),
                })
                .map(|(name, reg)| (name.clone(), reg.check.clone(), reg.required, reg.timeout))
                .collect()
        };

        let runs = selected.into_iter().map(|(name, check, required, timeout)| async move {
            let handle = tokio::spawn(async move { tokio::time::timeout(timeout, check.check(timeout)).await });
            let health = match handle.await {
                Ok(Ok(mut health)) => {
                    health.name = name.clone();
                    health
                }
                Ok(Err(_)) => ComponentHealth::unhealthy(
                    &name,
                    format!("Health check timed out after {}ms", timeout.as_millis()),
                ),
                Err(e) => {
                    tracing::error!(component = %name, error = %e, "Health check panicked");
                    ComponentHealth::unhealthy(&name, format!("Health check failed: {e}"))
                }
            };
            (health, required)
        });
        let results = join_all(runs).await;

        let status = overall_status(&results);
        let mut components = BTreeMap::new();
        for (health, _) in results {
            metrics::record_component_health(&health.name, health.status.as_gauge());
            components.insert(health.name.clone(), health);
        }

        SystemHealth {
            status,
            service: self.service_name.clone(),
            version: env!("CARGO_PKG_VERSION"),
            ready: self.readiness.is_ready(),
            checked_at: Utc::now(),
            uptime_seconds: self.started.elapsed().as_secs_f64(),
            components,
        }
    }

    /// Constant-cost process liveness; never touches dependencies.
    pub fn liveness(&self) -> SystemHealth {
        SystemHealth {
            status: HealthStatus::Healthy,
            service: self.service_name.clone(),
            version: env!("CARGO_PKG_VERSION"),
            ready: self.readiness.is_ready(),
            checked_at: Utc::now(),
            uptime_seconds: self.started.elapsed().as_secs_f64(),
            components: BTreeMap::new(),
        }
    }

    /// Full registry, overridden to UNHEALTHY once the service stops being ready.
    pub async fn readiness_report(&self, detailed: bool) -> SystemHealth {
        let mut health = self.check_all(&CheckFilter::All).await;
        if !health.ready {
            health.status = HealthStatus::Unhealthy;
        }
        if detailed {
            health
        } else {
            health.summary()
        }
    }
}

/// Required UNHEALTHY ⇒ UNHEALTHY; required DEGRADED or any optional
/// non-HEALTHY ⇒ DEGRADED; nothing registered ⇒ UNHEALTHY.
fn overall_status(results: &[(ComponentHealth, bool)]) -> HealthStatus {
    if results.is_empty() {
        return HealthStatus::Unhealthy;
    }
    let mut status = HealthStatus::Healthy;
    for (health, required) in results {
        match (health.status, required) {
            (HealthStatus::Unhealthy, true) => return HealthStatus::Unhealthy,
            (HealthStatus::Healthy, _) => {}
            _ => status = HealthStatus::Degraded,
        }
    }
    status
}
