//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → Build subsystems → Register checks/handlers → Ready
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT/Ctrl-C → ControlEvent::Shutdown
//!     SIGHUP                → ControlEvent::Reload
//!
//! Control (control.rs):
//!     ControlEvent → ShutdownCoordinator::shutdown | ConfigReloader::reload
//!
//! Shutdown (shutdown.rs):
//!     RUNNING → DRAINING (not ready, refuse new work)
//!             → wait for in-flight (bounded by grace period)
//!             → handlers, newest first → STOPPED → broadcast
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Shutdown runs at most once no matter how many signals arrive
//! - Shutdown has a deadline: abandoned work is counted, not awaited

pub mod control;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use control::ControlLoop;
pub use shutdown::{HandlerError, InflightGuard, LifecycleState, ShutdownCoordinator, ShutdownReport};
pub use signals::{control_channel, spawn_signal_listener, ControlEvent, ControlSender, ControlSource};
pub use startup::{bootstrap, Service};
