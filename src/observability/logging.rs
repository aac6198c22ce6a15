//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber once at process start
//! - Pick pretty or JSON output from config
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - JSON format for production, pretty format for development

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Install the global subscriber. A second call is ignored.
pub fn init(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "ingest_guard={level},tower_http={level}",
            level = config.log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {e}");
    }
}
