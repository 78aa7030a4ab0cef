use axum::Router;

use crate::middleware::{self, AuthState};

pub mod commands;
pub mod servers;
pub mod system;

/// Router for all authenticated endpoints.
///
/// Auth is attached per area with `route_layer`, so the middleware sees the
/// matched `:server_name` parameter.
pub fn router(auth: AuthState) -> Router {
    let layer = || axum::middleware::from_fn_with_state(auth.clone(), middleware::auth_middleware);

    Router::new()
        .nest("/api/commands", commands::router().route_layer(layer()))
        .nest("/api/servers", servers::router().route_layer(layer()))
}
