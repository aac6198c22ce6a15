//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,

    /// Token-bucket admission control.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker profiles keyed by dependency class.
    pub breakers: BTreeMap<String, BreakerConfig>,

    /// Retry policies keyed by operation class.
    pub retry_policies: BTreeMap<String, RetryPolicyConfig>,

    /// Downstream dependencies guarded and health-checked by the service.
    pub dependencies: Vec<DependencyConfig>,

    /// Health aggregation settings.
    pub health: HealthConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Audit trail settings.
    pub audit: AuditConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let mut breakers = BTreeMap::new();
        breakers.insert(CRITICAL_CLASS.to_string(), BreakerConfig::critical());
        breakers.insert(BACKGROUND_CLASS.to_string(), BreakerConfig::background());

        let mut retry_policies = BTreeMap::new();
        retry_policies.insert(DEFAULT_POLICY.to_string(), RetryPolicyConfig::default());

        Self {
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            breakers,
            retry_policies,
            dependencies: Vec::new(),
            health: HealthConfig::default(),
            shutdown: ShutdownConfig::default(),
            audit: AuditConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// Breaker class for synchronous, critical-path dependencies.
pub const CRITICAL_CLASS: &str = "critical";
/// Breaker class for asynchronous dependencies.
pub const BACKGROUND_CLASS: &str = "background";
/// Retry policy used when a dependency names none.
pub const DEFAULT_POLICY: &str = "default";

impl ServiceConfig {
    /// Re-insert the built-in breaker classes and default retry policy when a
    /// config file replaced those tables without naming them.
    pub fn with_builtin_profiles(mut self) -> Self {
        self.breakers
            .entry(CRITICAL_CLASS.to_string())
            .or_insert_with(BreakerConfig::critical);
        self.breakers
            .entry(BACKGROUND_CLASS.to_string())
            .or_insert_with(BreakerConfig::background);
        self.retry_policies
            .entry(DEFAULT_POLICY.to_string())
            .or_default();
        self
    }

    /// Find a dependency definition by name.
    pub fn dependency(&self, name: &str) -> Option<&DependencyConfig> {
        self.dependencies.iter().find(|d| d.name == name)
    }

    /// Breaker profile for a class, falling back to the critical profile.
    pub fn breaker_for_class(&self, class: &str) -> BreakerConfig {
        self.breakers
            .get(class)
            .or_else(|| self.breakers.get(CRITICAL_CLASS))
            .cloned()
            .unwrap_or_else(BreakerConfig::critical)
    }

    /// Breaker profile for a dependency name; unknown names use the critical profile.
    pub fn breaker_for_dependency(&self, name: &str) -> BreakerConfig {
        match self.dependency(name) {
            Some(dep) => self.breaker_for_class(&dep.class),
            None => self.breaker_for_class(CRITICAL_CLASS),
        }
    }

    /// Retry policy by name, falling back to the default policy.
    pub fn retry_policy(&self, name: &str) -> RetryPolicyConfig {
        self.retry_policies
            .get(name)
            .or_else(|| self.retry_policies.get(DEFAULT_POLICY))
            .cloned()
            .unwrap_or_default()
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// How rate-limit buckets are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Client IP (first `X-Forwarded-For` hop, else peer address).
    ClientAddress,
    /// `X-API-Key` credential, falling back to client address.
    Credential,
    /// Request path.
    Route,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests admitted per window at the sustained rate.
    pub requests_per_window: u32,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Bucket capacity; defaults to `requests_per_window`.
    pub burst_size: Option<u32>,

    /// Bucket key strategy.
    pub key_strategy: KeyStrategy,

    /// Path prefixes that bypass the limiter entirely.
    pub exempt_paths: Vec<String>,

    /// Buckets untouched for this long are evicted.
    pub idle_eviction_secs: u64,

    /// Interval of the background eviction sweep.
    pub sweep_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn capacity(&self) -> f64 {
        f64::from(self.burst_size.unwrap_or(self.requests_per_window))
    }

    pub fn refill_rate(&self) -> f64 {
        f64::from(self.requests_per_window) / self.window_secs.max(1) as f64
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: 100,
            window_secs: 60,
            burst_size: None,
            key_strategy: KeyStrategy::ClientAddress,
            exempt_paths: vec![
                "/health".to_string(),
                "/ready".to_string(),
                "/metrics".to_string(),
            ],
            idle_eviction_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

/// Circuit breaker profile for one dependency class.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive matching failures in CLOSED before opening.
    pub failure_threshold: u32,

    /// Successful probes in HALF_OPEN before closing.
    pub success_threshold: u32,

    /// Milliseconds spent OPEN before admitting probes.
    pub open_timeout_ms: u64,

    /// Maximum concurrent probes in HALF_OPEN.
    pub half_open_probe_budget: u32,

    /// Error kinds counted as failures; anything else passes through.
    pub expected_errors: Vec<ErrorKind>,
}

impl BreakerConfig {
    /// Tight thresholds for synchronous critical-path dependencies.
    pub fn critical() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout_ms: 30_000,
            half_open_probe_budget: 1,
            expected_errors: default_expected_errors(),
        }
    }

    /// Looser thresholds for asynchronous dependencies.
    pub fn background() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_ms: 60_000,
            half_open_probe_budget: 3,
            expected_errors: default_expected_errors(),
        }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::critical()
    }
}

fn default_expected_errors() -> Vec<ErrorKind> {
    vec![
        ErrorKind::Timeout,
        ErrorKind::Connection,
        ErrorKind::Unavailable,
        ErrorKind::RetryExhausted,
    ]
}

/// Retry policy for one operation class.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,

    /// Delay before the second attempt in milliseconds.
    pub initial_delay_ms: u64,

    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,

    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Error kinds that warrant another attempt.
    pub retryable: Vec<ErrorKind>,

    /// Random extra delay as a fraction of the computed delay.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 2000,
            retryable: vec![ErrorKind::Timeout, ErrorKind::Connection, ErrorKind::Unavailable],
            jitter_ratio: 0.0,
        }
    }
}

/// A downstream dependency (datastore, broker, external API).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DependencyConfig {
    /// Unique dependency identifier; also the breaker key.
    pub name: String,

    /// Address probed by health checks and pings (e.g., "127.0.0.1:5432").
    pub address: String,

    /// Breaker class.
    #[serde(default = "default_class")]
    pub class: String,

    /// Whether an UNHEALTHY result makes the whole service UNHEALTHY.
    #[serde(default = "default_required")]
    pub required: bool,

    /// Health check timeout in milliseconds.
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,

    /// Retry policy name for calls to this dependency.
    #[serde(default = "default_policy_name")]
    pub retry_policy: String,
}

fn default_class() -> String {
    CRITICAL_CLASS.to_string()
}

fn default_required() -> bool {
    true
}

fn default_check_timeout_ms() -> u64 {
    2000
}

fn default_policy_name() -> String {
    DEFAULT_POLICY.to_string()
}

/// Health aggregation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Service name reported in health bodies.
    pub service_name: String,

    /// Timeout for checks registered without one, in milliseconds.
    pub default_timeout_ms: u64,

    /// Register a breaker-state check per dependency.
    pub include_breaker_checks: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            service_name: "ingest-guard".to_string(),
            default_timeout_ms: 5000,
            include_breaker_checks: true,
        }
    }
}

/// Graceful shutdown settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Maximum time to wait for in-flight work to drain.
    pub grace_period_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 30,
        }
    }
}

/// Audit trail settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Emit audit events.
    pub enabled: bool,

    /// Scrub sensitive fields before serialization.
    pub redact: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Accepted API keys (`X-API-Key` or `Authorization: Bearer`).
    pub api_keys: Vec<String>,

    /// Allow live fault injection through the admin API.
    pub fault_injection_enabled: bool,
}
