//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast without running
//! - Half-Open: a bounded number of probes test whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive expected failures >= failure_threshold
//! Open → Half-Open: open_timeout elapsed (checked lazily on the next call)
//! Half-Open → Closed: successful probes >= success_threshold
//! Half-Open → Open: any expected failure (opened_at reset)
//! ```
//!
//! # Design Decisions
//! - Per-dependency instance; all mutable state behind one mutex
//! - Only the configured expected error kinds count as failures
//! - Each transition bumps an epoch; outcomes from calls admitted under an
//!   older epoch are discarded so transitions stay totally ordered
//! - A dropped (cancelled) probe gives its slot back

use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::audit::{AuditAction, AuditEvent, AuditLogger, AuditOutcome};
use crate::config::BreakerConfig;
use crate::error::{ErrorKind, ServiceError};
use crate::observability::metrics;

/// Retry-after hint for callers turned away because every half-open probe
/// slot is taken.
pub const PROBE_BUSY_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

/// Point-in-time view of a breaker, served by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub half_open_in_flight: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout_ms: u64,
    pub half_open_probe_budget: u32,
    /// Seconds until probes are admitted; only set while OPEN.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_until_half_open: Option<f64>,
}

#[derive(Debug)]
struct Inner {
    settings: BreakerConfig,
    expected: HashSet<ErrorKind>,
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    epoch: u64,
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
    reason: &'static str,
    consecutive_failures: u32,
}

impl Inner {
    fn transition(&mut self, to: CircuitState, reason: &'static str) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        let consecutive_failures = self.consecutive_failures;
        self.state = to;
        self.epoch += 1;
        self.half_open_in_flight = 0;
        self.consecutive_successes = 0;
        match to {
            CircuitState::Open => {
                self.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen | CircuitState::Closed => {
                self.opened_at = None;
                self.consecutive_failures = 0;
            }
        }
        Some(Transition {
            from,
            to,
            reason,
            consecutive_failures,
        })
    }
}

/// What a caller was admitted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Tracks one admitted call; releases a half-open slot if dropped unfinished.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    epoch: u64,
    finished: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.finished && self.admission == Admission::Probe {
            self.breaker.release_probe(self.epoch);
        }
    }
}

/// Per-dependency circuit breaker.
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<Inner>,
    audit: AuditLogger,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerConfig, audit: AuditLogger) -> Self {
        let name = name.into();
        tracing::info!(
            dependency = %name,
            failure_threshold = settings.failure_threshold,
            success_threshold = settings.success_threshold,
            open_timeout_ms = settings.open_timeout_ms,
            probe_budget = settings.half_open_probe_budget,
            "Circuit breaker initialized"
        );
        Self {
            name,
            inner: Mutex::new(Inner {
                expected: settings.expected_errors.iter().copied().collect(),
                settings,
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                half_open_in_flight: 0,
                epoch: 0,
            }),
            audit,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    /// Current state, advancing OPEN → HALF_OPEN if the open timeout has passed.
    pub fn state(&self) -> CircuitState {
        let (state, transition) = {
            let mut inner = self.lock();
            let transition = Self::maybe_half_open(&mut inner);
            (inner.state, transition)
        };
        self.emit(transition);
        state
    }

    /// Run `operation` if the breaker admits it, then record the outcome.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut permit = self.admit()?;
        let result = operation().await;
        permit.finished = true;
        match &result {
            Ok(_) => self.on_success(permit.admission, permit.epoch),
            Err(e) => self.on_failure(permit.admission, permit.epoch, e),
        }
        result
    }

    fn maybe_half_open(inner: &mut Inner) -> Option<Transition> {
        if inner.state != CircuitState::Open {
            return None;
        }
        let opened_at = inner.opened_at?;
        if opened_at.elapsed() >= inner.settings.open_timeout() {
            inner.transition(CircuitState::HalfOpen, "open timeout elapsed")
        } else {
            None
        }
    }

    fn admit(&self) -> Result<Permit<'_>, ServiceError> {
        let (decision, transition) = {
            let mut inner = self.lock();
            let transition = Self::maybe_half_open(&mut inner);
            let decision = match inner.state {
                CircuitState::Closed => Ok((Admission::Normal, inner.epoch)),
                CircuitState::HalfOpen => {
                    if inner.half_open_in_flight < inner.settings.half_open_probe_budget {
                        inner.half_open_in_flight += 1;
                        Ok((Admission::Probe, inner.epoch))
                    } else {
                        Err(PROBE_BUSY_RETRY_AFTER)
                    }
                }
                CircuitState::Open => {
                    let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                    Err(inner.settings.open_timeout().saturating_sub(elapsed))
                }
            };
            (decision, transition)
        };
        self.emit(transition);

        match decision {
            Ok((admission, epoch)) => Ok(Permit {
                breaker: self,
                admission,
                epoch,
                finished: false,
            }),
            Err(retry_after) => {
                tracing::debug!(dependency = %self.name, "Circuit open, rejecting call");
                Err(ServiceError::CircuitOpen {
                    dependency: self.name.clone(),
                    retry_after,
                })
            }
        }
    }

    fn on_success(&self, admission: Admission, epoch: u64) {
        let transition = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                return;
            }
            match (inner.state, admission) {
                (CircuitState::Closed, _) => {
                    inner.consecutive_failures = 0;
                    None
                }
                (CircuitState::HalfOpen, Admission::Probe) => {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= inner.settings.success_threshold {
                        inner.transition(CircuitState::Closed, "probes succeeded")
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        self.emit(transition);
    }

    fn on_failure(&self, admission: Admission, epoch: u64, error: &ServiceError) {
        let transition = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                return;
            }
            if !inner.expected.contains(&error.kind()) {
                if admission == Admission::Probe {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                }
                tracing::debug!(
                    dependency = %self.name,
                    kind = %error.kind(),
                    "Unexpected error kind, breaker state unchanged"
                );
                return;
            }
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= inner.settings.failure_threshold {
                        inner.transition(CircuitState::Open, "failure threshold reached")
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    inner.consecutive_failures += 1;
                    inner.transition(CircuitState::Open, "probe failed")
                }
                CircuitState::Open => None,
            }
        };
        self.emit(transition);
    }

    fn release_probe(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch == epoch && inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Force OPEN (operator action).
    pub fn force_open(&self) {
        tracing::warn!(dependency = %self.name, "Circuit breaker forced open");
        let transition = self.lock().transition(CircuitState::Open, "forced open");
        self.emit(transition);
    }

    /// Force CLOSED (operator action).
    pub fn force_closed(&self) {
        tracing::warn!(dependency = %self.name, "Circuit breaker forced closed");
        let transition = {
            let mut inner = self.lock();
            inner.consecutive_failures = 0;
            inner.transition(CircuitState::Closed, "forced closed")
        };
        self.emit(transition);
    }

    /// Apply new thresholds; the current state and counters are kept.
    pub fn reconfigure(&self, settings: BreakerConfig) {
        let mut inner = self.lock();
        if inner.settings == settings {
            return;
        }
        tracing::info!(
            dependency = %self.name,
            failure_threshold = settings.failure_threshold,
            open_timeout_ms = settings.open_timeout_ms,
            "Circuit breaker reconfigured"
        );
        inner.expected = settings.expected_errors.iter().copied().collect();
        inner.settings = settings;
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let (snapshot, transition) = {
            let mut inner = self.lock();
            let transition = Self::maybe_half_open(&mut inner);
            let seconds_until_half_open = match (inner.state, inner.opened_at) {
                (CircuitState::Open, Some(t)) => Some(
                    inner
                        .settings
                        .open_timeout()
                        .saturating_sub(t.elapsed())
                        .as_secs_f64(),
                ),
                _ => None,
            };
            let snapshot = BreakerSnapshot {
                name: self.name.clone(),
                state: inner.state,
                consecutive_failures: inner.consecutive_failures,
                consecutive_successes: inner.consecutive_successes,
                half_open_in_flight: inner.half_open_in_flight,
                failure_threshold: inner.settings.failure_threshold,
                success_threshold: inner.settings.success_threshold,
                open_timeout_ms: inner.settings.open_timeout_ms,
                half_open_probe_budget: inner.settings.half_open_probe_budget,
                seconds_until_half_open,
            };
            (snapshot, transition)
        };
        self.emit(transition);
        snapshot
    }

    fn emit(&self, transition: Option<Transition>) {
        let Some(t) = transition else {
            return;
        };
        match t.to {
            CircuitState::Open => tracing::error!(
                dependency = %self.name,
                from = t.from.as_str(),
                consecutive_failures = t.consecutive_failures,
                reason = t.reason,
                "Circuit breaker opened (failing fast)"
            ),
            CircuitState::HalfOpen => tracing::info!(
                dependency = %self.name,
                reason = t.reason,
                "Circuit breaker half-open (testing recovery)"
            ),
            CircuitState::Closed => tracing::info!(
                dependency = %self.name,
                from = t.from.as_str(),
                reason = t.reason,
                "Circuit breaker closed (recovered)"
            ),
        }

        metrics::record_breaker_transition(&self.name, t.to.as_str(), t.to.gauge());

        let outcome = match t.to {
            CircuitState::Closed => AuditOutcome::Success,
            CircuitState::HalfOpen => AuditOutcome::Partial,
            CircuitState::Open => AuditOutcome::Failure,
        };
        self.audit.record(
            AuditEvent::system(AuditAction::CircuitTransition, outcome)
                .resource(self.name.clone(), "dependency")
                .detail("from", t.from.as_str())
                .detail("to", t.to.as_str())
                .detail("reason", t.reason)
                .detail("consecutive_failures", t.consecutive_failures),
        );
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.lock().state)
            .finish()
    }
}
