//! Active fault set and scoped activation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEvent, AuditLogger, AuditOutcome};
use crate::error::ServiceError;
use crate::faults::scenario::{FaultEffect, FaultScenario};
use crate::observability::metrics;

/// A scenario currently in the active set.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveFault {
    #[serde(flatten)]
    pub scenario: FaultScenario,
    pub activated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Shared registry of active fault scenarios.
pub struct FaultRegistry {
    active: Mutex<HashMap<Uuid, ActiveFault>>,
    audit: AuditLogger,
}

impl FaultRegistry {
    pub fn new(audit: AuditLogger) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            audit,
        }
    }

    /// Register `scenarios` until the returned scope is dropped. Every
    /// activation is assigned fresh ids; ids carried by the input are ignored.
    pub fn activate(self: &Arc<Self>, scenarios: Vec<FaultScenario>) -> FaultScope {
        self.activate_until(scenarios, None)
    }

    /// Register `scenarios` for `duration`, detached from the caller.
    ///
    /// Returns the ids so operators can see what was activated. `clear()`
    /// removes them early.
    pub fn activate_for(self: &Arc<Self>, scenarios: Vec<FaultScenario>, duration: Duration) -> Vec<Uuid> {
        let expires_at = chrono::Duration::from_std(duration)
            .ok()
            .map(|d| Utc::now() + d);
        let scope = self.activate_until(scenarios, expires_at);
        let ids = scope.ids.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            drop(scope);
        });
        ids
    }

    fn activate_until(
        self: &Arc<Self>,
        scenarios: Vec<FaultScenario>,
        expires_at: Option<DateTime<Utc>>,
    ) -> FaultScope {
        let now = Utc::now();
        // Each activation gets its own id so a scope only ever removes its own entries.
        let scenarios: Vec<FaultScenario> = scenarios
            .into_iter()
            .map(|mut scenario| {
                scenario.id = Uuid::new_v4();
                scenario
            })
            .collect();
        let mut ids = Vec::with_capacity(scenarios.len());
        {
            let mut active = self.active.lock().expect("fault registry mutex poisoned");
            for scenario in &scenarios {
                ids.push(scenario.id);
                active.insert(
                    scenario.id,
                    ActiveFault {
                        scenario: scenario.clone(),
                        activated_at: now,
                        expires_at,
                    },
                );
            }
        }

        for scenario in &scenarios {
            tracing::warn!(
                fault = %scenario.name,
                target = %scenario.target,
                probability = scenario.probability,
                "Fault scenario activated"
            );
            self.audit.record(
                AuditEvent::system(AuditAction::FaultActivated, AuditOutcome::Success)
                    .resource(scenario.target.clone(), "dependency")
                    .detail("fault_id", scenario.id.to_string())
                    .detail("name", scenario.name.clone())
                    .detail("probability", scenario.probability),
            );
        }

        FaultScope {
            registry: Arc::clone(self),
            ids,
        }
    }

    fn deactivate(&self, ids: &[Uuid]) {
        let removed: Vec<ActiveFault> = {
            let mut active = self.active.lock().expect("fault registry mutex poisoned");
            ids.iter().filter_map(|id| active.remove(id)).collect()
        };
        for fault in removed {
            self.audit_deactivated(&fault.scenario);
        }
    }

    fn audit_deactivated(&self, scenario: &FaultScenario) {
        tracing::info!(fault = %scenario.name, target = %scenario.target, "Fault scenario deactivated");
        self.audit.record(
            AuditEvent::system(AuditAction::FaultDeactivated, AuditOutcome::Success)
                .resource(scenario.target.clone(), "dependency")
                .detail("fault_id", scenario.id.to_string())
                .detail("name", scenario.name.clone()),
        );
    }

    /// Remove every active scenario.
    pub fn clear(&self) -> usize {
        let removed: Vec<ActiveFault> = {
            let mut active = self.active.lock().expect("fault registry mutex poisoned");
            active.drain().map(|(_, fault)| fault).collect()
        };
        for fault in &removed {
            self.audit_deactivated(&fault.scenario);
        }
        removed.len()
    }

    pub fn active(&self) -> Vec<ActiveFault> {
        let mut faults: Vec<ActiveFault> = self
            .active
            .lock()
            .expect("fault registry mutex poisoned")
            .values()
            .cloned()
            .collect();
        faults.sort_by_key(|f| f.activated_at);
        faults
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().expect("fault registry mutex poisoned").is_empty()
    }

    /// Apply matching scenarios before a call to `dependency`.
    ///
    /// Each scenario draws independently. Latency effects accumulate; the
    /// first firing error scenario fails the call.
    pub async fn inject(&self, dependency: &str) -> Result<(), ServiceError> {
        let matching: Vec<FaultScenario> = {
            let active = self.active.lock().expect("fault registry mutex poisoned");
            if active.is_empty() {
                return Ok(());
            }
            active
                .values()
                .filter(|f| f.scenario.applies_to(dependency))
                .map(|f| f.scenario.clone())
                .collect()
        };

        for scenario in matching {
            if rand::random::<f64>() >= scenario.probability {
                continue;
            }
            match &scenario.effect {
                FaultEffect::Latency { delay_ms } => {
                    tracing::debug!(dependency, fault = %scenario.name, delay_ms, "Injecting latency");
                    metrics::record_fault_injected(dependency, "latency");
                    tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                }
                FaultEffect::Error { .. } => {
                    if let Some(error) = scenario.simulated_error(dependency) {
                        tracing::debug!(dependency, fault = %scenario.name, error = %error, "Injecting error");
                        metrics::record_fault_injected(dependency, "error");
                        return Err(error);
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for FaultRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultRegistry")
            .field("active", &self.active().len())
            .finish()
    }
}

/// Guard that removes its scenarios from the registry when dropped.
#[must_use = "scenarios are removed as soon as the scope is dropped"]
pub struct FaultScope {
    registry: Arc<FaultRegistry>,
    ids: Vec<Uuid>,
}

impl FaultScope {
    pub fn ids(&self) -> &[Uuid] {
        &self.ids
    }
}

impl Drop for FaultScope {
    fn drop(&mut self) {
        self.registry.deactivate(&self.ids);
    }
}
