//! Fault scenario definitions and preset builders.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, ServiceError};

/// Target matching every dependency.
pub const ANY_DEPENDENCY: &str = "*";

/// What happens when a scenario fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FaultEffect {
    /// Fail the call with a simulated error of this kind.
    Error {
        kind: ErrorKind,
        #[serde(default)]
        message: Option<String>,
    },
    /// Delay the call before it runs.
    Latency { delay_ms: u64 },
}

/// One probabilistic fault aimed at a dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultScenario {
    /// Reassigned by the registry on every activation.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    /// Dependency name, or `*` for all.
    pub target: String,
    #[serde(default = "always")]
    pub probability: f64,
    pub effect: FaultEffect,
}

fn always() -> f64 {
    1.0
}

impl FaultScenario {
    pub fn new(name: impl Into<String>, target: impl Into<String>, effect: FaultEffect) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            target: target.into(),
            probability: 1.0,
            effect,
        }
    }

    pub fn error(target: impl Into<String>, kind: ErrorKind) -> Self {
        let target = target.into();
        Self::new(format!("{target} {kind}"), target, FaultEffect::Error { kind, message: None })
    }

    pub fn latency(target: impl Into<String>, delay: Duration) -> Self {
        let target = target.into();
        Self::new(
            format!("{target} latency {}ms", delay.as_millis()),
            target,
            FaultEffect::Latency {
                delay_ms: delay.as_millis() as u64,
            },
        )
    }

    /// Clamped into [0, 1].
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn applies_to(&self, dependency: &str) -> bool {
        self.target == ANY_DEPENDENCY || self.target == dependency
    }

    /// The error this scenario produces, if it is an error scenario.
    pub fn simulated_error(&self, dependency: &str) -> Option<ServiceError> {
        match &self.effect {
            FaultEffect::Error { kind, message } => {
                let message = message
                    .clone()
                    .unwrap_or_else(|| format!("injected fault '{}' on {dependency}", self.name));
                Some(if kind.is_transient() {
                    ServiceError::transient(*kind, message)
                } else {
                    ServiceError::permanent(*kind, message)
                })
            }
            FaultEffect::Latency { .. } => None,
        }
    }

    /// Checks that `probability` lies in [0, 1] and `target` is non-empty.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(format!("probability must be within [0, 1], got {}", self.probability));
        }
        if self.target.is_empty() {
            return Err("target must not be empty".to_string());
        }
        Ok(())
    }
}

/// Broker refuses every call.
pub fn broker_outage() -> FaultScenario {
    let mut scenario = FaultScenario::error("broker", ErrorKind::Unavailable);
    scenario.name = "broker outage".to_string();
    scenario
}

/// Datastore calls are slowed down some of the time.
pub fn datastore_slowdown(latency: Duration, probability: f64) -> FaultScenario {
    let mut scenario = FaultScenario::latency("datastore", latency).with_probability(probability);
    scenario.name = "datastore slowdown".to_string();
    scenario
}

/// Occasional connection failures on every dependency.
pub fn network_partition(probability: f64) -> FaultScenario {
    let mut scenario =
        FaultScenario::error(ANY_DEPENDENCY, ErrorKind::Connection).with_probability(probability);
    scenario.name = "network partition".to_string();
    scenario
}

/// Intermittent connection errors on one dependency.
pub fn intermittent_errors(target: &str, probability: f64) -> FaultScenario {
    let mut scenario = FaultScenario::error(target, ErrorKind::Connection).with_probability(probability);
    scenario.name = format!("{target} intermittent errors");
    scenario
}

/// Everything degraded at once.
pub fn full_degradation() -> Vec<FaultScenario> {
    vec![
        datastore_slowdown(Duration::from_millis(3000), 0.7),
        intermittent_errors("cache", 0.5),
        network_partition(0.1),
    ]
}

/// Preset by name, as accepted by the admin API and CLI.
pub fn preset(name: &str) -> Option<Vec<FaultScenario>> {
    match name {
        "broker_outage" => Some(vec![broker_outage()]),
        "datastore_slowdown" => Some(vec![datastore_slowdown(Duration::from_millis(5000), 0.5)]),
        "network_partition" => Some(vec![network_partition(0.1)]),
        "intermittent_errors" => Some(vec![intermittent_errors("cache", 0.3)]),
        "full_degradation" => Some(full_degradation()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_target() {
        let partition = network_partition(0.1);
        assert!(partition.applies_to("broker"));
        assert!(partition.applies_to("datastore"));
        assert!(!broker_outage().applies_to("datastore"));
    }

    #[test]
    fn test_simulated_error_classification() {
        let err = broker_outage().simulated_error("broker").unwrap();
        assert!(matches!(err, ServiceError::Transient { kind: ErrorKind::Unavailable, .. }));

        let auth = FaultScenario::error("api", ErrorKind::Unauthorized).simulated_error("api").unwrap();
        assert!(matches!(auth, ServiceError::Permanent { .. }));

        assert!(datastore_slowdown(Duration::from_millis(10), 1.0)
            .simulated_error("datastore")
            .is_none());
    }

    #[test]
    fn test_deserialize_admin_payload() {
        let scenario: FaultScenario = serde_json::from_str(
            r#"{"name":"slow db","target":"datastore","effect":{"type":"latency","delay_ms":250}}"#,
        )
        .unwrap();
        assert_eq!(scenario.probability, 1.0);
        assert_eq!(scenario.effect, FaultEffect::Latency { delay_ms: 250 });

        let bad = FaultScenario { probability: 1.5, ..scenario };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_presets_by_name() {
        assert_eq!(preset("full_degradation").unwrap().len(), 3);
        assert!(preset("meteor_strike").is_none());
    }
}
