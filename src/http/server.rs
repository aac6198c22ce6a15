//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with probe, dependency and admin handlers
//! - Wire up middleware (request ID, tracing, limits, rate limiting, in-flight tracking)
//! - Serve on a bound listener until the shutdown coordinator reaches STOPPED

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::audit::AuditLogger;
use crate::config::{ConfigReloader, SharedConfig};
use crate::health::HealthAggregator;
use crate::http::handlers::{detailed_health, liveness, ping_dependency, readiness};
use crate::http::request::track_inflight;
use crate::lifecycle::{ControlSender, Service, ShutdownCoordinator};
use crate::resilience::DependencyGuard;
use crate::security::{rate_limit_middleware, RateLimiter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: SharedConfig,
    pub guard: DependencyGuard,
    pub limiter: Arc<RateLimiter>,
    pub health: Arc<HealthAggregator>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub reloader: Arc<ConfigReloader>,
    pub control_tx: ControlSender,
    pub audit: AuditLogger,
}

impl From<&Service> for AppState {
    fn from(service: &Service) -> Self {
        Self {
            config: service.config.clone(),
            guard: service.guard.clone(),
            limiter: service.limiter.clone(),
            health: service.health.clone(),
            shutdown: service.shutdown.clone(),
            reloader: service.reloader.clone(),
            control_tx: service.control_tx.clone(),
            audit: service.audit.clone(),
        }
    }
}

/// HTTP front end of the guard.
pub struct HttpServer {
    router: Router,
    shutdown: Arc<ShutdownCoordinator>,
}

impl HttpServer {
    pub fn new(service: &Service) -> Self {
        let state = AppState::from(service);
        Self {
            router: build_router(state),
            shutdown: service.shutdown.clone(),
        }
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = self.shutdown;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait_stopped().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
///
/// Layers run outermost first on the way in: request ID, trace, body limit,
/// timeout, rate limit, in-flight tracking.
#[allow(deprecated)]
pub fn build_router(state: AppState) -> Router {
    let settings = state.config.load();
    let request_timeout = Duration::from_secs(settings.server.request_timeout_secs);
    let max_body_bytes = settings.server.max_body_bytes;

    Router::new()
        .route("/health", get(liveness))
        .route("/health/detailed", get(detailed_health))
        .route("/ready", get(readiness))
        .route("/api/v1/dependencies/{name}/ping", post(ping_dependency))
        .merge(admin::router(state.clone()))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state.shutdown.clone(), track_inflight))
        .layer(middleware::from_fn_with_state(state.limiter.clone(), rate_limit_middleware))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
