//! Hot configuration reload.
//!
//! # Responsibilities
//! - Re-read and validate the config file on SIGHUP, file change or API call
//! - Atomically swap the live config handle
//! - Push new settings into registered components (breakers, limiter,
//!   dependency health checks, shutdown grace period)
//!
//! # Design Decisions
//! - A failed reload keeps the current configuration
//! - Listener address, observability, audit and health service settings need
//!   a restart; a change is logged and otherwise ignored
//! - Reload never touches the shutdown state machine

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use serde_json::Value;

use crate::audit::{AuditAction, AuditEvent, AuditLogger, AuditOutcome, Redactor};
use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::ServiceConfig;
use crate::lifecycle::signals::ControlSource;

/// Live, atomically swappable configuration handle.
pub type SharedConfig = Arc<ArcSwap<ServiceConfig>>;

pub fn shared(config: ServiceConfig) -> SharedConfig {
    Arc::new(ArcSwap::from_pointee(config))
}

/// A component that can absorb new settings without restarting.
pub trait Reconfigurable: Send + Sync {
    fn component(&self) -> &'static str;
    fn reconfigure(&self, config: &ServiceConfig);
}

/// Result of a reload, returned by `POST /config/reload`.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadOutcome {
    pub status: &'static str,
    pub source: ControlSource,
    /// Effective configuration with secrets masked.
    pub config: Value,
}

pub struct ConfigReloader {
    path: Option<PathBuf>,
    config: SharedConfig,
    components: Vec<Arc<dyn Reconfigurable>>,
    audit: AuditLogger,
}

impl ConfigReloader {
    pub fn new(path: Option<PathBuf>, config: SharedConfig, audit: AuditLogger) -> Self {
        Self {
            path,
            config,
            components: Vec::new(),
            audit,
        }
    }

    pub fn with_component(mut self, component: Arc<dyn Reconfigurable>) -> Self {
        self.components.push(component);
        self
    }

    pub fn current(&self) -> Arc<ServiceConfig> {
        self.config.load_full()
    }

    /// Reload from disk and apply. Without a config file the in-memory
    /// configuration is re-applied and reported as `unchanged`.
    pub fn reload(&self, source: ControlSource) -> Result<ReloadOutcome, ConfigError> {
        tracing::info!(source = %source, "Starting configuration reload");

        let Some(path) = &self.path else {
            tracing::warn!(source = %source, "No config file to reload from");
            return Ok(self.outcome("unchanged", source, &self.current()));
        };

        let next = match load_config(path) {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(
                    source = %source,
                    path = %path.display(),
                    error = %e,
                    "Config reload failed, keeping current configuration"
                );
                self.audit.record(
                    AuditEvent::system(AuditAction::ConfigReloaded, AuditOutcome::Failure)
                        .detail("source", source.as_str())
                        .error(e.to_string()),
                );
                return Err(e);
            }
        };

        let previous = self.current();
        warn_restart_only(&previous, &next);

        let next = Arc::new(next);
        self.config.store(next.clone());
        for component in &self.components {
            component.reconfigure(&next);
            tracing::debug!(component = component.component(), "Applied reloaded config");
        }

        tracing::info!(
            source = %source,
            dependencies = next.dependencies.len(),
            breaker_classes = next.breakers.len(),
            "Configuration reload complete"
        );
        self.audit.record(
            AuditEvent::system(AuditAction::ConfigReloaded, AuditOutcome::Success)
                .detail("source", source.as_str())
                .detail("path", path.display().to_string()),
        );

        Ok(self.outcome("success", source, &next))
    }

    fn outcome(&self, status: &'static str, source: ControlSource, config: &ServiceConfig) -> ReloadOutcome {
        ReloadOutcome {
            status,
            source,
            config: redacted_config(config),
        }
    }
}

/// Serialize a config with secrets masked.
pub fn redacted_config(config: &ServiceConfig) -> Value {
    match serde_json::to_value(config) {
        Ok(value) => Redactor.redact_value(value),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize configuration");
            Value::Null
        }
    }
}

fn warn_restart_only(previous: &ServiceConfig, next: &ServiceConfig) {
    if previous.server.bind_address != next.server.bind_address {
        tracing::warn!(
            current = %previous.server.bind_address,
            requested = %next.server.bind_address,
            "server.bind_address changed; restart required to apply"
        );
    }
    let (a, b) = (&previous.observability, &next.observability);
    if a.log_level != b.log_level
        || a.log_format != b.log_format
        || a.metrics_enabled != b.metrics_enabled
        || a.metrics_address != b.metrics_address
    {
        tracing::warn!("observability settings changed; restart required to apply");
    }
    if previous.audit.enabled != next.audit.enabled || previous.audit.redact != next.audit.redact {
        tracing::warn!("audit settings changed; restart required to apply");
    }
    if previous.health.service_name != next.health.service_name
        || previous.health.default_timeout_ms != next.health.default_timeout_ms
    {
        tracing::warn!("health.service_name or health.default_timeout_ms changed; restart required to apply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use crate::config::AuditConfig;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counting(AtomicU32);

    impl Reconfigurable for Counting {
        fn component(&self) -> &'static str {
            "counting"
        }

        fn reconfigure(&self, config: &ServiceConfig) {
            self.0.store(config.rate_limit.requests_per_window, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_reload_swaps_and_notifies() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[rate_limit]\nrequests_per_window = 7\n\n[admin]\napi_keys = [\"s3cret\"]"
        )
        .unwrap();

        let sink = Arc::new(MemorySink::new());
        let audit = AuditLogger::new(&AuditConfig::default(), sink.clone());
        let live = shared(ServiceConfig::default());
        let counting = Arc::new(Counting::default());
        let reloader = ConfigReloader::new(Some(file.path().to_path_buf()), live.clone(), audit)
            .with_component(counting.clone());

        let outcome = reloader.reload(ControlSource::Sighup).unwrap();
        assert_eq!(outcome.status, "success");
        assert_eq!(live.load().rate_limit.requests_per_window, 7);
        assert_eq!(counting.0.load(Ordering::SeqCst), 7);
        assert_eq!(outcome.config["admin"]["api_keys"], crate::audit::redact::REDACTED);
        assert_eq!(sink.with_action("config.reloaded")[0]["details"]["source"], "SIGHUP");
    }

    #[test]
    fn test_invalid_file_keeps_current() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate_limit]\nwindow_secs = 0").unwrap();

        let live = shared(ServiceConfig::default());
        let reloader =
            ConfigReloader::new(Some(file.path().to_path_buf()), live.clone(), AuditLogger::disabled());

        assert!(matches!(
            reloader.reload(ControlSource::Api),
            Err(ConfigError::Validation(_))
        ));
        assert_eq!(live.load().rate_limit.window_secs, 60);
    }

    #[test]
    fn test_without_file_reports_unchanged() {
        let reloader = ConfigReloader::new(None, shared(ServiceConfig::default()), AuditLogger::disabled());
        assert_eq!(reloader.reload(ControlSource::Api).unwrap().status, "unchanged");
    }
}
