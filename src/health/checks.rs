//! Concrete health checks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::error::ServiceError;
use crate::health::ComponentHealth;
use crate::resilience::{with_timeout, CircuitBreaker, CircuitState};

/// Capability implemented by every registered check.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    /// Produce this component's health. The aggregator enforces `timeout`
    /// externally as well; checks may use it to bound their own I/O.
    async fn check(&self, timeout: Duration) -> ComponentHealth;
}

/// The service itself; always healthy while the process answers.
#[derive(Debug, Clone)]
pub struct SelfCheck {
    name: String,
}

impl SelfCheck {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl HealthCheck for SelfCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, _timeout: Duration) -> ComponentHealth {
        ComponentHealth::healthy(&self.name, "Service is running")
    }
}

/// Open a TCP connection to `address` and report the connect latency.
pub async fn probe_tcp(address: &str, timeout: Duration) -> Result<Duration, ServiceError> {
    let started = Instant::now();
    with_timeout(&format!("connect to {address}"), timeout, async {
        TcpStream::connect(address).await.map_err(ServiceError::from)
    })
    .await?;
    Ok(started.elapsed())
}

/// Reachability of a datastore, broker or external API by TCP connect.
#[derive(Debug, Clone)]
pub struct TcpProbeCheck {
    name: String,
    address: String,
}

impl TcpProbeCheck {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

#[async_trait]
impl HealthCheck for TcpProbeCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, timeout: Duration) -> ComponentHealth {
        match probe_tcp(&self.address, timeout).await {
            Ok(latency) => ComponentHealth::healthy(&self.name, "Connection successful")
                .with_metadata("address", self.address.clone())
                .with_metadata("latency_ms", latency.as_millis() as u64),
            Err(e) => {
                tracing::warn!(component = %self.name, address = %self.address, error = %e, "Health probe failed");
                ComponentHealth::unhealthy(&self.name, format!("Connection failed: {e}"))
                    .with_metadata("address", self.address.clone())
            }
        }
    }
}

/// Maps a dependency's breaker state to health.
#[derive(Debug, Clone)]
pub struct BreakerCheck {
    name: String,
    breaker: Arc<CircuitBreaker>,
}

impl BreakerCheck {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            name: format!("{}_circuit", breaker.name()),
            breaker,
        }
    }
}

#[async_trait]
impl HealthCheck for BreakerCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, _timeout: Duration) -> ComponentHealth {
        let snapshot = self.breaker.snapshot();
        let health = match snapshot.state {
            CircuitState::Closed => ComponentHealth::healthy(&self.name, "Circuit closed"),
            CircuitState::HalfOpen => ComponentHealth::degraded(&self.name, "Circuit half-open, probing recovery"),
            CircuitState::Open => ComponentHealth::unhealthy(&self.name, "Circuit open, failing fast"),
        };
        health
            .with_metadata("state", snapshot.state.as_str())
            .with_metadata("consecutive_failures", snapshot.consecutive_failures)
    }
}

/// Adapter turning an async closure into a check.
pub struct FnCheck<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnCheck<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ComponentHealth> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F, Fut> HealthCheck for FnCheck<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ComponentHealth> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, _timeout: Duration) -> ComponentHealth {
        (self.f)().await
    }
}
