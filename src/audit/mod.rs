//! Audit trail subsystem.
//!
//! # Data Flow
//! ```text
//! Subsystem (breaker, limiter, retry, shutdown, reload, admin auth)
//!     → AuditLogger::record(AuditEvent)
//!     → serde_json::Value
//!     → redact.rs (field-name + pattern masking)
//!     → AuditSink (tracing target "audit", or in-memory for tests)
//! ```
//!
//! # Design Decisions
//! - Redaction happens before serialization reaches any sink
//! - Sinks are pluggable so tests can assert on emitted events
//! - History lives only in the running process

pub mod redact;

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::AuditConfig;
pub use redact::Redactor;

/// Auditable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditAction {
    #[serde(rename = "auth.failure")]
    AuthFailure,
    #[serde(rename = "circuit.transition")]
    CircuitTransition,
    #[serde(rename = "rate_limit.denied")]
    RateLimitDenied,
    #[serde(rename = "retry.attempt")]
    RetryAttempt,
    #[serde(rename = "retry.succeeded")]
    RetrySucceeded,
    #[serde(rename = "retry.aborted")]
    RetryAborted,
    #[serde(rename = "retry.exhausted")]
    RetryExhausted,
    #[serde(rename = "system.shutdown.signal")]
    ShutdownSignal,
    #[serde(rename = "system.shutdown.completed")]
    ShutdownCompleted,
    #[serde(rename = "config.reloaded")]
    ConfigReloaded,
    #[serde(rename = "fault.activated")]
    FaultActivated,
    #[serde(rename = "fault.deactivated")]
    FaultDeactivated,
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Partial,
    Denied,
}

/// Structured audit event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub actor: String,
    pub actor_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuditEvent {
    /// Event performed by the service itself.
    pub fn system(action: AuditAction, outcome: AuditOutcome) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            action,
            outcome,
            actor: "ingest-guard".to_string(),
            actor_type: "system".to_string(),
            resource: None,
            resource_type: None,
            client_ip: None,
            correlation_id: None,
            details: Map::new(),
            error_message: None,
        }
    }

    pub fn actor(mut self, actor: impl Into<String>, actor_type: impl Into<String>) -> Self {
        self.actor = actor.into();
        self.actor_type = actor_type.into();
        self
    }

    pub fn resource(mut self, resource: impl Into<String>, resource_type: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn client_ip(mut self, ip: Option<String>) -> Self {
        self.client_ip = ip;
        self
    }

    pub fn correlation_id(mut self, id: Option<String>) -> Self {
        self.correlation_id = id;
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Destination for serialized, redacted audit events.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &Value);
}

/// Writes events through `tracing` under the `audit` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn emit(&self, event: &Value) {
        let action = event.get("action").and_then(Value::as_str).unwrap_or("-");
        let outcome = event.get("outcome").and_then(Value::as_str).unwrap_or("-");
        tracing::info!(
            target: "audit",
            action,
            outcome,
            event = %event,
            "AUDIT"
        );
    }
}

/// Keeps events in memory; used by tests and the admin API.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Value>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Value> {
        self.events.lock().expect("audit sink mutex poisoned").clone()
    }

    /// Events whose `action` matches the serialized action name.
    pub fn with_action(&self, action: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|e| e.get("action").and_then(Value::as_str) == Some(action))
            .collect()
    }
}

impl AuditSink for MemorySink {
    fn emit(&self, event: &Value) {
        self.events
            .lock()
            .expect("audit sink mutex poisoned")
            .push(event.clone());
    }
}

/// Audit logger with automatic sensitive data redaction.
#[derive(Clone)]
pub struct AuditLogger {
    enabled: bool,
    redact: bool,
    redactor: Redactor,
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    pub fn new(config: &AuditConfig, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            enabled: config.enabled,
            redact: config.redact,
            redactor: Redactor,
            sink,
        }
    }

    /// Logger writing to `tracing` with default settings.
    pub fn tracing() -> Self {
        Self::new(&AuditConfig::default(), Arc::new(TracingSink))
    }

    /// Logger that drops every event.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            redact: true,
            redactor: Redactor,
            sink: Arc::new(TracingSink),
        }
    }

    pub fn record(&self, event: AuditEvent) {
        if !self.enabled {
            return;
        }
        let value = match serde_json::to_value(&event) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize audit event");
                return;
            }
        };
        let value = if self.redact {
            self.redactor.redact_value(value)
        } else {
            value
        };
        self.sink.emit(&value);
    }

    pub fn auth_failure(
        &self,
        actor: &str,
        reason: &str,
        client_ip: Option<String>,
        correlation_id: Option<String>,
    ) {
        self.record(
            AuditEvent::system(AuditAction::AuthFailure, AuditOutcome::Denied)
                .actor(actor, "api_key")
                .client_ip(client_ip)
                .correlation_id(correlation_id)
                .error(reason),
        );
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("enabled", &self.enabled)
            .field("redact", &self.redact)
            .finish()
    }
}
