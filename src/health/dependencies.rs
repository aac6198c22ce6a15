//! Health checks derived from the `[[dependencies]]` table.
//!
//! Registered at startup and re-synced on every config reload: new entries
//! get checks, changed entries are replaced, removed entries are dropped.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{Reconfigurable, ServiceConfig};
use crate::health::checks::{BreakerCheck, HealthCheck, TcpProbeCheck};
use crate::health::HealthAggregator;
use crate::resilience::BreakerRegistry;

pub struct DependencyChecks {
    health: Arc<HealthAggregator>,
    breakers: Arc<BreakerRegistry>,
    registered: Mutex<BTreeSet<String>>,
}

impl DependencyChecks {
    pub fn new(health: Arc<HealthAggregator>, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            health,
            breakers,
            registered: Mutex::new(BTreeSet::new()),
        }
    }

    /// Bring the registered checks in line with `config.dependencies`.
    pub fn sync(&self, config: &ServiceConfig) {
        let mut wanted = BTreeSet::new();
        for dep in &config.dependencies {
            let probe = TcpProbeCheck::new(dep.name.clone(), dep.address.clone());
            wanted.insert(dep.name.clone());
            self.health.register(
                Arc::new(probe),
                dep.required,
                Some(Duration::from_millis(dep.check_timeout_ms)),
            );

            let breaker = self.breakers.get_or_create(&dep.name);
            if config.health.include_breaker_checks {
                let check = BreakerCheck::new(breaker);
                wanted.insert(check.name().to_string());
                self.health.register(Arc::new(check), false, None);
            }
        }

        let mut registered = self.registered.lock().expect("dependency checks mutex poisoned");
        for stale in registered.difference(&wanted) {
            self.health.deregister(stale);
        }
        tracing::debug!(
            checks = wanted.len(),
            removed = registered.difference(&wanted).count(),
            "Dependency health checks synced"
        );
        *registered = wanted;
    }
}

impl Reconfigurable for DependencyChecks {
    fn component(&self) -> &'static str {
        "dependency_health"
    }

    fn reconfigure(&self, config: &ServiceConfig) {
        self.sync(config);
    }
}
