//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → shared via Arc<ArcSwap<_>> to all subsystems
//!
//! On reload (SIGHUP, file change, POST /config/reload):
//!     watcher.rs / signals → ControlEvent::Reload
//!     → reload.rs loads + validates
//!     → atomic swap of the live handle
//!     → Reconfigurable components pick up new settings
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod reload;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use reload::{ConfigReloader, Reconfigurable, ReloadOutcome, SharedConfig};
pub use schema::{
    AdminConfig, AuditConfig, BreakerConfig, DependencyConfig, HealthConfig, KeyStrategy,
    LogFormat, ObservabilityConfig, RateLimitConfig, RetryPolicyConfig, ServerConfig,
    ServiceConfig, ShutdownConfig, BACKGROUND_CLASS, CRITICAL_CLASS, DEFAULT_POLICY,
};
