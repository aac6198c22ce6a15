//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (dependencies reference existing breaker classes and policies)
//! - Validate value ranges (thresholds >= 1, multipliers >= 1, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, including on reload

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::ServiceConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("server.bind_address", "must be a socket address"));
    }

    let rl = &config.rate_limit;
    if rl.requests_per_window == 0 {
        errors.push(ValidationError::new("rate_limit.requests_per_window", "must be >= 1"));
    }
    if rl.window_secs == 0 {
        errors.push(ValidationError::new("rate_limit.window_secs", "must be >= 1"));
    }
    if rl.burst_size == Some(0) {
        errors.push(ValidationError::new("rate_limit.burst_size", "must be >= 1"));
    }

    for (class, breaker) in &config.breakers {
        let field = |name: &str| format!("breakers.{class}.{name}");
        if breaker.failure_threshold == 0 {
            errors.push(ValidationError::new(field("failure_threshold"), "must be >= 1"));
        }
        if breaker.success_threshold == 0 {
            errors.push(ValidationError::new(field("success_threshold"), "must be >= 1"));
        }
        if breaker.half_open_probe_budget == 0 {
            errors.push(ValidationError::new(field("half_open_probe_budget"), "must be >= 1"));
        }
    }

    for (name, policy) in &config.retry_policies {
        let field = |f: &str| format!("retry_policies.{name}.{f}");
        if policy.max_attempts == 0 {
            errors.push(ValidationError::new(field("max_attempts"), "must be >= 1"));
        }
        if !policy.backoff_multiplier.is_finite() || policy.backoff_multiplier < 1.0 {
            errors.push(ValidationError::new(field("backoff_multiplier"), "must be >= 1.0"));
        }
        if policy.max_delay_ms < policy.initial_delay_ms {
            errors.push(ValidationError::new(field("max_delay_ms"), "must be >= initial_delay_ms"));
        }
        if !(0.0..=1.0).contains(&policy.jitter_ratio) {
            errors.push(ValidationError::new(field("jitter_ratio"), "must be within [0, 1]"));
        }
    }

    let mut seen = HashSet::new();
    for (i, dep) in config.dependencies.iter().enumerate() {
        let field = |f: &str| format!("dependencies[{i}].{f}");
        if dep.name.trim().is_empty() {
            errors.push(ValidationError::new(field("name"), "must not be empty"));
        } else if !seen.insert(dep.name.as_str()) {
            errors.push(ValidationError::new(field("name"), format!("duplicate dependency '{}'", dep.name)));
        }
        let port_ok = dep
            .address
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !port_ok {
            errors.push(ValidationError::new(field("address"), "must be host:port"));
        }
        if !config.breakers.contains_key(&dep.class) {
            errors.push(ValidationError::new(field("class"), format!("unknown breaker class '{}'", dep.class)));
        }
        if !config.retry_policies.contains_key(&dep.retry_policy) {
            errors.push(ValidationError::new(
                field("retry_policy"),
                format!("unknown retry policy '{}'", dep.retry_policy),
            ));
        }
        if dep.check_timeout_ms == 0 {
            errors.push(ValidationError::new(field("check_timeout_ms"), "must be >= 1"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "must be a socket address"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
