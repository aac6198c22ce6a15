//! ingest-guard server binary.
//!
//! # Startup order
//!
//! ```text
//! --config ─▶ load + validate ─▶ logging ─▶ metrics exporter
//!                                              │
//!                                              ▼
//!        bootstrap (breakers, retry, limiter, faults, health, shutdown, reload)
//!                                              │
//!        ┌─────────────┬───────────────┬───────┴───────┬─────────────────┐
//!        ▼             ▼               ▼               ▼                 ▼
//!   signal listener  control loop  bucket sweeper  config watcher   HTTP server
//!        │                ▲                                              │
//!        └── ControlEvent ┘                                              ▼
//!                                                            ready ─▶ serve until STOPPED
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use ingest_guard::audit::TracingSink;
use ingest_guard::config::{load_config, watcher::ConfigWatcher, ServiceConfig};
use ingest_guard::http::HttpServer;
use ingest_guard::lifecycle::{bootstrap, spawn_signal_listener, ControlLoop};
use ingest_guard::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "ingest-guard")]
#[command(about = "Resilience layer for the event ingestion service", long_about = None)]
struct Args {
    /// Path to the TOML configuration file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ingest-guard starting");
    tracing::info!(
        bind_address = %config.server.bind_address,
        dependencies = config.dependencies.len(),
        config_file = ?args.config,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let bind_address = config.server.bind_address.clone();
    let (service, control_rx) = bootstrap(config, args.config.clone(), Arc::new(TracingSink));

    spawn_signal_listener(service.control_tx.clone());
    let control = ControlLoop::new(control_rx, service.shutdown.clone(), service.reloader.clone()).spawn();
    service.limiter.clone().spawn_sweeper(service.shutdown.subscribe());

    // Kept alive for the lifetime of the server.
    let _watcher = match &args.config {
        Some(path) => match ConfigWatcher::new(path, service.control_tx.clone()).run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Config watcher unavailable; reload via SIGHUP or API");
                None
            }
        },
        None => None,
    };

    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(&service);
    service.mark_ready();
    server.run(listener).await?;

    if let Err(e) = control.await {
        tracing::error!(error = %e, "Control loop task failed");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
