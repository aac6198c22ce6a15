//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from a validated configuration
//! - Register health checks for the service and each dependency
//! - Register shutdown handlers and reloadable components (breakers, limiter,
//!   dependency checks, grace period)
//!
//! # Design Decisions
//! - Subsystems initialize in order, not concurrently
//! - Readiness stays false until `Service::mark_ready` (listeners start last)
//! - Nothing here binds sockets or spawns tasks; `main` owns that

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditLogger, AuditSink};
use crate::config::{self, ConfigReloader, ServiceConfig, SharedConfig};
use crate::faults::FaultRegistry;
use crate::health::{DependencyChecks, HealthAggregator, Readiness, SelfCheck};
use crate::lifecycle::shutdown::{HandlerError, ShutdownCoordinator};
use crate::lifecycle::signals::{control_channel, ControlReceiver, ControlSender};
use crate::resilience::{BreakerRegistry, DependencyGuard, RetryExecutor};
use crate::security::RateLimiter;

/// Name of the always-present self check.
pub const SELF_CHECK: &str = "api";

/// Every long-lived subsystem, wired together.
#[derive(Clone)]
pub struct Service {
    pub config: SharedConfig,
    pub audit: AuditLogger,
    pub breakers: Arc<BreakerRegistry>,
    pub faults: Arc<FaultRegistry>,
    pub guard: DependencyGuard,
    pub limiter: Arc<RateLimiter>,
    pub health: Arc<HealthAggregator>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub reloader: Arc<ConfigReloader>,
    pub control_tx: ControlSender,
}

impl Service {
    /// Flip readiness once listeners are accepting.
    pub fn mark_ready(&self) {
        self.health.readiness().set_ready(true);
        tracing::info!("Service marked ready");
    }
}

/// Build the service graph. The returned receiver feeds the control loop.
pub fn bootstrap(
    config: ServiceConfig,
    config_path: Option<PathBuf>,
    sink: Arc<dyn AuditSink>,
) -> (Service, ControlReceiver) {
    let audit = AuditLogger::new(&config.audit, sink);
    let shared = config::reload::shared(config.clone());
    let readiness = Readiness::new();

    let breakers = Arc::new(BreakerRegistry::new(shared.clone(), audit.clone()));
    let faults = Arc::new(FaultRegistry::new(audit.clone()));
    let guard = DependencyGuard::new(
        breakers.clone(),
        RetryExecutor::new(audit.clone()),
        faults.clone(),
        shared.clone(),
    );
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), audit.clone()));

    let health = Arc::new(HealthAggregator::new(
        config.health.service_name.clone(),
        Duration::from_millis(config.health.default_timeout_ms),
        readiness.clone(),
    ));
    health.register(Arc::new(SelfCheck::new(SELF_CHECK)), true, None);
    let dependency_checks = Arc::new(DependencyChecks::new(health.clone(), breakers.clone()));
    dependency_checks.sync(&config);

    let shutdown = Arc::new(ShutdownCoordinator::new(
        Duration::from_secs(config.shutdown.grace_period_secs),
        readiness,
        audit.clone(),
    ));
    register_shutdown_handlers(&shutdown, &faults, &limiter, &breakers);

    let reloader = Arc::new(
        ConfigReloader::new(config_path, shared.clone(), audit.clone())
            .with_component(breakers.clone())
            .with_component(limiter.clone())
            .with_component(dependency_checks)
            .with_component(shutdown.clone()),
    );

    let (control_tx, control_rx) = control_channel();

    tracing::info!(
        dependencies = config.dependencies.len(),
        health_checks = health.component_names().len(),
        rate_limit_enabled = config.rate_limit.enabled,
        "Subsystems initialized"
    );

    let service = Service {
        config: shared,
        audit,
        breakers,
        faults,
        guard,
        limiter,
        health,
        shutdown,
        reloader,
        control_tx,
    };
    (service, control_rx)
}

// Handlers run newest first: breaker summary, limiter buckets, then faults.
fn register_shutdown_handlers(
    shutdown: &ShutdownCoordinator,
    faults: &Arc<FaultRegistry>,
    limiter: &Arc<RateLimiter>,
    breakers: &Arc<BreakerRegistry>,
) {
    let faults = faults.clone();
    shutdown.register_handler("clear_faults", move || async move {
        let cleared = faults.clear();
        tracing::info!(cleared, "Fault scenarios cleared");
        Ok::<(), HandlerError>(())
    });

    let limiter = limiter.clone();
    shutdown.register_handler("rate_limiter", move || async move {
        limiter.clear();
        Ok::<(), HandlerError>(())
    });

    let breakers = breakers.clone();
    shutdown.register_handler("breaker_summary", move || async move {
        for snap in breakers.snapshots() {
            tracing::info!(
                dependency = %snap.name,
                state = snap.state.as_str(),
                consecutive_failures = snap.consecutive_failures,
                "Final circuit state"
            );
        }
        Ok::<(), HandlerError>(())
    });
}
