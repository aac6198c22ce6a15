//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServiceConfig, ConfigError> {
    let config = toml::from_str::<ServiceConfig>(content)?.with_builtin_profiles();
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::KeyStrategy;
    use crate::error::ErrorKind;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.breakers.contains_key("critical"));
        assert!(config.breakers.contains_key("background"));
        assert_eq!(config.retry_policy("anything").max_attempts, 3);
    }

    #[test]
    fn test_full_document() {
        let toml = r#"
            [rate_limit]
            requests_per_window = 10
            window_secs = 1
            key_strategy = "credential"

            [breakers.critical]
            failure_threshold = 2
            open_timeout_ms = 500

            [retry_policies.broker]
            max_attempts = 5
            initial_delay_ms = 50
            retryable = ["timeout", "connection"]

            [[dependencies]]
            name = "broker"
            address = "127.0.0.1:9092"
            class = "background"
            required = false
            retry_policy = "broker"
        "#;
        let config = parse_config(toml).unwrap();
        assert_eq!(config.rate_limit.key_strategy, KeyStrategy::Credential);
        assert_eq!(config.breakers["critical"].failure_threshold, 2);
        assert_eq!(config.breakers["critical"].success_threshold, 2);
        assert_eq!(
            config.retry_policy("broker").retryable,
            vec![ErrorKind::Timeout, ErrorKind::Connection]
        );
        assert_eq!(config.breaker_for_dependency("broker").failure_threshold, 5);
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config = parse_config(include_str!("../../config/ingest-guard.toml")).unwrap();
        assert_eq!(config.dependencies.len(), 3);
        assert_eq!(config.breaker_for_dependency("cache").half_open_probe_budget, 3);
        assert_eq!(config.retry_policy("broker").max_attempts, 5);
        assert!(!config.dependency("cache").unwrap().required);
    }

    #[test]
    fn test_invalid_document_reports_validation() {
        let toml = r#"
            [retry_policies.bad]
            max_attempts = 0
        "#;
        let err = parse_config(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("retry_policies.bad.max_attempts"));
    }
}
