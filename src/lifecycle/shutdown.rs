//! Shutdown coordination.
//!
//! # Responsibilities
//! - Track in-flight operations and refuse new ones once draining
//! - Flip the shared readiness flag so load balancers stop routing here
//! - Wait (bounded by the grace period) for in-flight work to finish
//! - Run cleanup handlers in reverse registration order, isolating failures
//! - Broadcast STOPPED to long-running tasks (server, sweeper, watcher)
//!
//! # State Machine
//! ```text
//! RUNNING ──first shutdown──▶ DRAINING ──handlers done──▶ STOPPED
//!              (repeats while DRAINING/STOPPED are no-ops)
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

use crate::audit::{AuditAction, AuditEvent, AuditLogger, AuditOutcome};
use crate::config::{Reconfigurable, ServiceConfig};
use crate::error::ServiceError;
use crate::health::Readiness;
use crate::lifecycle::signals::ControlSource;
use crate::observability::metrics;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;
type Handler = Box<dyn FnOnce() -> HandlerFuture + Send>;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

impl From<u8> for LifecycleState {
    fn from(value: u8) -> Self {
        match value {
            0 => LifecycleState::Running,
            1 => LifecycleState::Draining,
            _ => LifecycleState::Stopped,
        }
    }
}

/// Result of one cleanup handler.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerOutcome {
    pub name: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of a completed shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub source: ControlSource,
    pub drained: bool,
    pub abandoned_operations: usize,
    pub drain_ms: u64,
    pub handlers: Vec<HandlerOutcome>,
}

pub struct ShutdownCoordinator {
    state: AtomicU8,
    inflight: AtomicUsize,
    drained: Notify,
    handlers: Mutex<Vec<(String, Handler)>>,
    grace_period_ms: AtomicU64,
    readiness: Readiness,
    stopped_tx: broadcast::Sender<()>,
    audit: AuditLogger,
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration, readiness: Readiness, audit: AuditLogger) -> Self {
        let (stopped_tx, _) = broadcast::channel(1);
        Self {
            state: AtomicU8::new(LifecycleState::Running as u8),
            inflight: AtomicUsize::new(0),
            drained: Notify::new(),
            handlers: Mutex::new(Vec::new()),
            grace_period_ms: AtomicU64::new(grace_period.as_millis() as u64),
            readiness,
            stopped_tx,
            audit,
        }
    }

    /// Upper bound on the drain phase; re-read when a shutdown starts.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms.load(Ordering::Acquire))
    }

    pub fn set_grace_period(&self, grace_period: Duration) {
        self.grace_period_ms
            .store(grace_period.as_millis() as u64, Ordering::Release);
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Receiver notified once STOPPED is reached.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.stopped_tx.subscribe()
    }

    /// Resolve once STOPPED is reached (immediately if it already was).
    pub async fn wait_stopped(&self) {
        let mut rx = self.stopped_tx.subscribe();
        if self.state() == LifecycleState::Stopped {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Track one unit of work. Refused with `ShutdownInProgress` once draining.
    pub fn begin_operation(self: &Arc<Self>) -> Result<InflightGuard, ServiceError> {
        let count = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        if self.state() != LifecycleState::Running {
            self.finish_operation();
            return Err(ServiceError::ShutdownInProgress);
        }
        metrics::record_inflight(count);
        Ok(InflightGuard {
            coordinator: Arc::clone(self),
        })
    }

    fn finish_operation(&self) {
        let remaining = self.inflight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::record_inflight(remaining);
        if remaining == 0 {
            self.drained.notify_waiters();
        }
    }

    /// Register a cleanup callback. Handlers run once, newest first.
    pub fn register_handler<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let name = name.into();
        if self.state() != LifecycleState::Running {
            tracing::warn!(handler = %name, "Shutdown handler registered after shutdown began; it will not run");
        }
        tracing::debug!(handler = %name, "Registered shutdown handler");
        self.handlers
            .lock()
            .expect("shutdown handlers mutex poisoned")
            .push((name, Box::new(move || Box::pin(handler()) as HandlerFuture)));
    }

    /// Run the shutdown sequence. Returns `None` when one is already under way.
    pub async fn shutdown(&self, source: ControlSource) -> Option<ShutdownReport> {
        if self
            .state
            .compare_exchange(
                LifecycleState::Running as u8,
                LifecycleState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            tracing::warn!(source = %source, "Shutdown already in progress");
            return None;
        }

        let grace_period = self.grace_period();
        tracing::info!(
            source = %source,
            inflight = self.inflight(),
            grace_period_secs = grace_period.as_secs(),
            "Starting graceful shutdown"
        );
        self.audit.record(
            AuditEvent::system(AuditAction::ShutdownSignal, AuditOutcome::Success)
                .detail("source", source.as_str())
                .detail("inflight", self.inflight() as u64),
        );
        self.readiness.set_ready(false);

        let drain_started = Instant::now();
        let drained = self.drain(grace_period).await;
        let abandoned_operations = self.inflight();
        if !drained {
            tracing::warn!(
                abandoned_operations,
                grace_period_secs = grace_period.as_secs(),
                "Grace period elapsed with operations still in flight"
            );
        }

        let handlers = self.run_handlers().await;

        self.state.store(LifecycleState::Stopped as u8, Ordering::SeqCst);
        let failed = handlers.iter().filter(|h| !h.ok).count();
        let report = ShutdownReport {
            source,
            drained,
            abandoned_operations,
            drain_ms: drain_started.elapsed().as_millis() as u64,
            handlers,
        };

        let outcome = if drained && failed == 0 {
            AuditOutcome::Success
        } else {
            AuditOutcome::Partial
        };
        self.audit.record(
            AuditEvent::system(AuditAction::ShutdownCompleted, outcome)
                .detail("source", source.as_str())
                .detail("drained", drained)
                .detail("abandoned_operations", abandoned_operations as u64)
                .detail("failed_handlers", failed as u64),
        );
        tracing::info!(drained, failed_handlers = failed, "Graceful shutdown complete");
        let _ = self.stopped_tx.send(());
        Some(report)
    }

    async fn drain(&self, grace_period: Duration) -> bool {
        let deadline = Instant::now() + grace_period;
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inflight() == 0 {
                return true;
            }
            tracing::debug!(inflight = self.inflight(), "Waiting for in-flight operations");
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.inflight() == 0;
            }
        }
    }

    async fn run_handlers(&self) -> Vec<HandlerOutcome> {
        let handlers = std::mem::take(&mut *self.handlers.lock().expect("shutdown handlers mutex poisoned"));
        let mut outcomes = Vec::with_capacity(handlers.len());

        for (name, handler) in handlers.into_iter().rev() {
            tracing::info!(handler = %name, "Executing shutdown handler");
            let outcome = match tokio::spawn(handler()).await {
                Ok(Ok(())) => {
                    tracing::info!(handler = %name, "Completed shutdown handler");
                    HandlerOutcome { name, ok: true, error: None }
                }
                Ok(Err(e)) => {
                    tracing::error!(handler = %name, error = %e, "Error in shutdown handler");
                    HandlerOutcome {
                        name,
                        ok: false,
                        error: Some(e.to_string()),
                    }
                }
                Err(e) => {
                    tracing::error!(handler = %name, error = %e, "Shutdown handler panicked");
                    HandlerOutcome {
                        name,
                        ok: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("state", &self.state())
            .field("inflight", &self.inflight())
            .field("grace_period", &self.grace_period())
            .finish()
    }
}

impl Reconfigurable for ShutdownCoordinator {
    fn component(&self) -> &'static str {
        "shutdown"
    }

    fn reconfigure(&self, config: &ServiceConfig) {
        self.set_grace_period(Duration::from_secs(config.shutdown.grace_period_secs));
    }
}

/// RAII marker for one in-flight operation.
#[derive(Debug)]
pub struct InflightGuard {
    coordinator: Arc<ShutdownCoordinator>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.coordinator.finish_operation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use crate::config::AuditConfig;

    fn coordinator(grace: Duration) -> (Arc<ShutdownCoordinator>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let audit = AuditLogger::new(&AuditConfig::default(), sink.clone());
        (Arc::new(ShutdownCoordinator::new(grace, Readiness::new(), audit)), sink)
    }

    #[tokio::test]
    async fn test_handlers_run_in_reverse_and_failures_are_isolated() {
        let (coord, _) = coordinator(Duration::from_secs(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = order.clone();
            coord.register_handler(name, move || async move {
                order.lock().unwrap().push(name);
                if name == "second" {
                    return Err(HandlerError::from("flush failed"));
                }
                Ok::<(), HandlerError>(())
            });
        }
        coord.register_handler("panicky", || async {
            let missing: Option<()> = None;
            missing.expect("handler blew up");
            Ok::<(), HandlerError>(())
        });

        let report = coord.shutdown(ControlSource::Sigterm).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
        let names: Vec<_> = report.handlers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["panicky", "third", "second", "first"]);
        assert!(!report.handlers[0].ok);
        assert!(!report.handlers[2].ok);
        assert!(report.handlers[3].ok);
        assert_eq!(coord.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_repeated_shutdown_is_noop() {
        let (coord, sink) = coordinator(Duration::from_secs(1));
        let _guard = coord.begin_operation().unwrap();

        let first = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.shutdown(ControlSource::Sigterm).await })
        };
        while coord.state() == LifecycleState::Running {
            tokio::task::yield_now().await;
        }
        assert!(coord.shutdown(ControlSource::Sigint).await.is_none());
        assert!(!coord.readiness().is_ready());

        drop(_guard);
        let report = first.await.unwrap().unwrap();
        assert!(report.drained);
        assert_eq!(sink.with_action("system.shutdown.signal").len(), 1);
    }

    #[tokio::test]
    async fn test_new_work_refused_while_draining() {
        let (coord, _) = coordinator(Duration::from_secs(1));
        let guard = coord.begin_operation().unwrap();
        let task = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.shutdown(ControlSource::Api).await })
        };
        while coord.state() == LifecycleState::Running {
            tokio::task::yield_now().await;
        }
        assert!(matches!(coord.begin_operation(), Err(ServiceError::ShutdownInProgress)));
        assert_eq!(coord.inflight(), 1);
        drop(guard);
        task.await.unwrap();
        coord.wait_stopped().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_bounds_drain() {
        let (coord, _) = coordinator(Duration::from_secs(5));
        let _stuck = coord.begin_operation().unwrap();
        let mut stopped = coord.subscribe();

        let started = Instant::now();
        let report = coord.shutdown(ControlSource::Sigterm).await.unwrap();
        assert!(!report.drained);
        assert_eq!(report.abandoned_operations, 1);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(stopped.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reloaded_grace_period_applies_to_next_shutdown() {
        let (coord, _) = coordinator(Duration::from_secs(30));
        let mut config = ServiceConfig::default();
        config.shutdown.grace_period_secs = 1;
        coord.reconfigure(&config);
        assert_eq!(coord.grace_period(), Duration::from_secs(1));

        let _stuck = coord.begin_operation().unwrap();
        let started = Instant::now();
        let report = coord.shutdown(ControlSource::Sigterm).await.unwrap();
        assert!(!report.drained);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
