//! Operator API: circuit control, fault injection, shutdown and reload.
//!
//! Every route sits behind `auth::admin_auth_middleware`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/circuits", get(list_circuits))
        .route("/admin/circuits/{name}/open", post(open_circuit))
        .route("/admin/circuits/{name}/close", post(close_circuit))
        .route("/admin/faults", get(list_faults).post(inject_faults).delete(clear_faults))
        .route("/admin/shutdown", post(request_shutdown))
        .route("/config/reload", post(reload_config))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
