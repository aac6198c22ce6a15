//! Lookup-or-create registry of circuit breakers keyed by dependency name.

use std::sync::Arc;

use dashmap::DashMap;

use crate::audit::AuditLogger;
use crate::config::{Reconfigurable, ServiceConfig, SharedConfig};
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker};

/// Process-wide breaker registry. Built once at startup and shared via `Arc`;
/// tests build their own isolated instances.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: SharedConfig,
    audit: AuditLogger,
}

impl BreakerRegistry {
    pub fn new(config: SharedConfig, audit: AuditLogger) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            audit,
        }
    }

    /// Breaker for `dependency`, created with its class profile on first use.
    pub fn get_or_create(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(dependency) {
            return existing.clone();
        }
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                let settings = self.config.load().breaker_for_dependency(dependency);
                Arc::new(CircuitBreaker::new(dependency, settings, self.audit.clone()))
            })
            .clone()
    }

    pub fn get(&self, dependency: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(dependency).map(|b| b.clone())
    }

    /// Snapshots of every breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|entry| entry.value().clone()).collect();
        let mut snapshots: Vec<BreakerSnapshot> = breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Reconfigurable for BreakerRegistry {
    fn component(&self) -> &'static str {
        "circuit_breakers"
    }

    fn reconfigure(&self, config: &ServiceConfig) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|entry| entry.value().clone()).collect();
        for breaker in breakers {
            breaker.reconfigure(config.breaker_for_dependency(breaker.name()));
        }
    }
}
