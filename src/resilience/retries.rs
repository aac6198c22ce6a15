//! Retry logic.
//!
//! # Responsibilities
//! - Classify failures as retryable by `ErrorKind`, per policy
//! - Execute retries with exponential backoff (+ optional jitter)
//! - Surface `RetryExhausted` wrapping the last failure once the budget is spent
//!
//! # Design Decisions
//! - One immutable policy per operation class, built from config
//! - Non-retryable errors propagate immediately and unchanged
//! - Backoff uses `tokio::time::sleep` and is not externally cancellable
//! - Every attempt and the final outcome are audited and counted

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::audit::{AuditAction, AuditEvent, AuditLogger, AuditOutcome};
use crate::config::RetryPolicyConfig;
use crate::error::{ErrorKind, ServiceError};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Immutable retry policy for one operation class.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    name: String,
    max_attempts: u32,
    initial_delay: Duration,
    backoff_multiplier: f64,
    max_delay: Duration,
    retryable: HashSet<ErrorKind>,
    jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn new(name: impl Into<String>, max_attempts: u32, initial_delay: Duration) -> Self {
        let defaults = RetryPolicyConfig::default();
        Self {
            name: name.into(),
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_multiplier: defaults.backoff_multiplier,
            max_delay: Duration::from_millis(defaults.max_delay_ms).max(initial_delay),
            retryable: defaults.retryable.into_iter().collect(),
            jitter_ratio: 0.0,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &RetryPolicyConfig) -> Self {
        Self {
            name: name.into(),
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_multiplier: config.backoff_multiplier.max(1.0),
            max_delay: Duration::from_millis(config.max_delay_ms),
            retryable: config.retryable.iter().copied().collect(),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable(&self, error: &ServiceError) -> bool {
        self.retryable.contains(&error.kind())
    }

    /// Delay before `attempt` (1-based); zero for the first attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.initial_delay,
            self.backoff_multiplier,
            self.max_delay,
            self.jitter_ratio,
        )
    }
}

/// Runs operations under a retry policy.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    audit: AuditLogger,
}

impl RetryExecutor {
    pub fn new(audit: AuditLogger) -> Self {
        Self { audit }
    }

    /// Execute `operation` until it succeeds, fails with a non-retryable
    /// error, or the policy's attempt budget is spent.
    pub async fn execute<F, Fut, T>(&self, policy: &RetryPolicy, mut operation: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            metrics::record_retry_attempt(policy.name());
            let error = match operation().await {
                Ok(value) => {
                    self.audit_attempt(policy, attempt, None);
                    if attempt > 1 {
                        tracing::info!(policy = %policy.name(), attempt, "Operation succeeded after retry");
                    }
                    self.audit_outcome(policy, AuditAction::RetrySucceeded, attempt, started, None);
                    metrics::record_retry_outcome(policy.name(), "succeeded");
                    return Ok(value);
                }
                Err(e) => e,
            };
            self.audit_attempt(policy, attempt, Some(&error));

            if !policy.is_retryable(&error) {
                tracing::debug!(
                    policy = %policy.name(),
                    attempt,
                    kind = %error.kind(),
                    "Non-retryable failure, not retrying"
                );
                self.audit_outcome(policy, AuditAction::RetryAborted, attempt, started, Some(&error));
                metrics::record_retry_outcome(policy.name(), "aborted");
                return Err(error);
            }

            if attempt >= policy.max_attempts() {
                let elapsed = started.elapsed();
                tracing::warn!(
                    policy = %policy.name(),
                    attempts = attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %error,
                    "Retry budget exhausted"
                );
                self.audit_outcome(policy, AuditAction::RetryExhausted, attempt, started, Some(&error));
                metrics::record_retry_outcome(policy.name(), "exhausted");
                return Err(ServiceError::RetryExhausted {
                    attempts: attempt,
                    elapsed,
                    last: Box::new(error),
                });
            }

            attempt += 1;
            let delay = policy.delay_before(attempt);
            tracing::debug!(
                policy = %policy.name(),
                next_attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn audit_attempt(&self, policy: &RetryPolicy, attempt: u32, error: Option<&ServiceError>) {
        let outcome = if error.is_some() {
            AuditOutcome::Failure
        } else {
            AuditOutcome::Success
        };
        let mut event = AuditEvent::system(AuditAction::RetryAttempt, outcome)
            .resource(policy.name(), "retry_policy")
            .detail("attempt", attempt)
            .detail("max_attempts", policy.max_attempts());
        if let Some(e) = error {
            event = event.detail("error_kind", e.kind().as_str()).error(e.to_string());
        }
        self.audit.record(event);
    }

    fn audit_outcome(
        &self,
        policy: &RetryPolicy,
        action: AuditAction,
        attempts: u32,
        started: Instant,
        error: Option<&ServiceError>,
    ) {
        let outcome = match action {
            AuditAction::RetrySucceeded => AuditOutcome::Success,
            _ => AuditOutcome::Failure,
        };
        let mut event = AuditEvent::system(action, outcome)
            .resource(policy.name(), "retry_policy")
            .detail("attempts", attempts)
            .detail("elapsed_ms", started.elapsed().as_millis() as u64);
        if let Some(e) = error {
            event = event.detail("error_kind", e.kind().as_str()).error(e.to_string());
        }
        self.audit.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use crate::config::AuditConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn executor() -> (RetryExecutor, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let audit = AuditLogger::new(&AuditConfig::default(), sink.clone());
        (RetryExecutor::new(audit), sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let (executor, sink) = executor();
        let policy = RetryPolicy::new("ingest", 3, Duration::from_secs(1)).with_multiplier(2.0);
        let calls = AtomicU32::new(0);

        let started = Instant::now();
        let result: Result<(), _> = executor
            .execute(&policy, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ServiceError::connection("reset by peer")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s before attempt 2, 2s before attempt 3
        assert!(started.elapsed() >= Duration::from_secs(3));
        match result {
            Err(ServiceError::RetryExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last.kind(), ErrorKind::Connection);
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
        assert_eq!(sink.with_action("retry.attempt").len(), 3);
        assert_eq!(sink.with_action("retry.exhausted").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_propagates_immediately() {
        let (executor, sink) = executor();
        let policy = RetryPolicy::new("ingest", 5, Duration::from_millis(100));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute(&policy, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ServiceError::invalid_input("bad payload")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(ServiceError::Permanent { kind: ErrorKind::InvalidInput, .. })
        ));
        assert_eq!(sink.with_action("retry.aborted").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_later_attempt() {
        let (executor, sink) = executor();
        let policy = RetryPolicy::new("ingest", 4, Duration::from_millis(50));
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(&policy, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(ServiceError::timeout("slow upstream"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        let succeeded = sink.with_action("retry.succeeded");
        assert_eq!(succeeded.len(), 1);
        assert_eq!(succeeded[0]["details"]["attempts"], 3);
    }

    #[test]
    fn test_policy_from_config_clamps() {
        let config = RetryPolicyConfig {
            max_attempts: 0,
            backoff_multiplier: 0.5,
            jitter_ratio: 4.0,
            ..RetryPolicyConfig::default()
        };
        let policy = RetryPolicy::from_config("weird", &config);
        assert_eq!(policy.max_attempts(), 1);
        // multiplier clamps to 1.0, jitter to 100%
        let delay = policy.delay_before(3);
        assert!(delay >= Duration::from_millis(100) && delay <= Duration::from_millis(200));
        assert!(policy.is_retryable(&ServiceError::timeout("t")));
        assert!(!policy.is_retryable(&ServiceError::ShutdownInProgress));
    }
}
