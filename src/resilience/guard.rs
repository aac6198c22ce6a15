//! Composition of breaker, retry and fault injection around a dependency call.
//!
//! ```text
//! DependencyGuard::call(dep, op)
//!     → RetryExecutor::execute(policy_for(dep),          attempt loop
//!         BreakerRegistry::get_or_create(dep).call(      one admission per attempt
//!             FaultRegistry::inject(dep) → op()))        faults before each attempt
//! ```
//!
//! Every attempt is an outcome the breaker sees, so a call that exhausts its
//! retries can open the circuit on its own. `CircuitOpen` is not retryable:
//! once open, the next attempt fails fast and the retry loop stops.

use std::future::Future;
use std::sync::Arc;

use crate::config::{SharedConfig, DEFAULT_POLICY};
use crate::error::ServiceError;
use crate::faults::FaultRegistry;
use crate::resilience::registry::BreakerRegistry;
use crate::resilience::retries::{RetryExecutor, RetryPolicy};

#[derive(Clone)]
pub struct DependencyGuard {
    breakers: Arc<BreakerRegistry>,
    retry: RetryExecutor,
    faults: Arc<FaultRegistry>,
    config: SharedConfig,
}

impl DependencyGuard {
    pub fn new(
        breakers: Arc<BreakerRegistry>,
        retry: RetryExecutor,
        faults: Arc<FaultRegistry>,
        config: SharedConfig,
    ) -> Self {
        Self {
            breakers,
            retry,
            faults,
            config,
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn faults(&self) -> &Arc<FaultRegistry> {
        &self.faults
    }

    /// Retry policy configured for `dependency`.
    pub fn policy_for(&self, dependency: &str) -> RetryPolicy {
        let config = self.config.load();
        let name = config
            .dependency(dependency)
            .map(|d| d.retry_policy.as_str())
            .unwrap_or(DEFAULT_POLICY);
        RetryPolicy::from_config(name, &config.retry_policy(name))
    }

    /// Call `dependency` with its configured retry policy.
    pub async fn call<F, Fut, T>(&self, dependency: &str, operation: F) -> Result<T, ServiceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let policy = self.policy_for(dependency);
        self.call_with_policy(dependency, &policy, operation).await
    }

    /// Call `dependency` with an explicit retry policy.
    pub async fn call_with_policy<F, Fut, T>(
        &self,
        dependency: &str,
        policy: &RetryPolicy,
        operation: F,
    ) -> Result<T, ServiceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let breaker = self.breakers.get_or_create(dependency);
        let breaker = &breaker;
        let faults = &self.faults;
        let operation = &operation;
        self.retry
            .execute(policy, move || async move {
                breaker
                    .call(|| async move {
                        faults.inject(dependency).await?;
                        operation().await
                    })
                    .await
            })
            .await
    }
}

impl std::fmt::Debug for DependencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGuard")
            .field("breakers", &self.breakers.len())
            .field("faults", &self.faults)
            .finish()
    }
}
