//! Fault injection harness.
//!
//! # Data Flow
//! ```text
//! Test code / admin API
//!     → FaultRegistry::activate(scenarios) → FaultScope (RAII)
//!     → DependencyGuard consults FaultRegistry::inject(dependency) before each call
//!         → per matching scenario: draw uniform [0,1); below probability → apply effect
//!     → FaultScope dropped (normal exit, `?`, panic unwind, or timer) → scenarios removed
//! ```
//!
//! # Design Decisions
//! - Scenarios are data (serde) so the admin API and presets share one shape
//! - Removal is tied to `Drop`, never to an explicit call the caller might skip
//! - Active set lives only in the running process

pub mod registry;
pub mod scenario;

pub use registry::{ActiveFault, FaultRegistry, FaultScope};
pub use scenario::{FaultEffect, FaultScenario, ANY_DEPENDENCY};
