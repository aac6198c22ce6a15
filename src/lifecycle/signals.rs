//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to typed `ControlEvent`s on the control channel
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Signals never act directly; the control loop is the single consumer
//! - SIGHUP triggers config reload, not shutdown
//! - Non-unix platforms only get Ctrl-C; reload/shutdown stay reachable over HTTP

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Where a control event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSource {
    Sigterm,
    Sigint,
    Sighup,
    CtrlC,
    Api,
    FileWatch,
}

impl ControlSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlSource::Sigterm => "SIGTERM",
            ControlSource::Sigint => "SIGINT",
            ControlSource::Sighup => "SIGHUP",
            ControlSource::CtrlC => "ctrl_c",
            ControlSource::Api => "api",
            ControlSource::FileWatch => "file_watch",
        }
    }
}

impl fmt::Display for ControlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed process-control event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Shutdown { source: ControlSource },
    Reload { source: ControlSource },
}

pub type ControlSender = mpsc::UnboundedSender<ControlEvent>;
pub type ControlReceiver = mpsc::UnboundedReceiver<ControlEvent>;

/// Create the single-consumer control channel.
pub fn control_channel() -> (ControlSender, ControlReceiver) {
    mpsc::unbounded_channel()
}

/// Forward OS signals into the control channel until the receiver goes away.
#[cfg(unix)]
pub fn spawn_signal_listener(tx: ControlSender) -> JoinHandle<()> {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let (mut term, mut int, mut hup) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
            signal(SignalKind::hangup()),
        ) {
            (Ok(term), Ok(int), Ok(hup)) => (term, int, hup),
            _ => {
                tracing::error!("Failed to install signal handlers; use the HTTP control endpoints");
                return;
            }
        };
        tracing::info!("Installed signal handlers for SIGTERM, SIGINT, SIGHUP");

        loop {
            let event = tokio::select! {
                _ = term.recv() => ControlEvent::Shutdown { source: ControlSource::Sigterm },
                _ = int.recv() => ControlEvent::Shutdown { source: ControlSource::Sigint },
                _ = hup.recv() => ControlEvent::Reload { source: ControlSource::Sighup },
            };
            tracing::info!(event = ?event, "Signal received");
            if tx.send(event).is_err() {
                break;
            }
        }
    })
}

/// Forward Ctrl-C into the control channel until the receiver goes away.
#[cfg(not(unix))]
pub fn spawn_signal_listener(tx: ControlSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::warn!("SIGHUP not available on this platform; reload via POST /config/reload");
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                return;
            }
            let event = ControlEvent::Shutdown { source: ControlSource::CtrlC };
            tracing::info!(event = ?event, "Signal received");
            if tx.send(event).is_err() {
                break;
            }
        }
    })
}
