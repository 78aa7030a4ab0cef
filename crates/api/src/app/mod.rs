//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (store, registry, cache, sweeper)
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and extraction helpers
//! - `errors.rs`: consistent error responses

use std::time::Duration;

use axum::{Extension, Router, http::StatusCode, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, BootError, build_services};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: &AppServices, request_timeout: Duration) -> Router {
    let auth_state = middleware::AuthState {
        credentials: services.registry.clone(),
    };

    let protected = routes::router(auth_state).layer(Extension(services.commands.clone()));

    Router::new()
        .route(
            "/api/health",
            get(routes::system::health).layer(Extension(services.commands.clone())),
        )
        .merge(protected)
        .fallback(not_found)
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn_with_state(
            request_timeout,
            middleware::timeout_middleware,
        )))
}

async fn not_found() -> axum::response::Response {
    errors::json_error(StatusCode::NOT_FOUND, "not_found", "Endpoint not found")
}
