use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use rconq_infra::CommandService;

/// Liveness plus store reachability. Unauthenticated.
pub async fn health(Extension(service): Extension<Arc<CommandService>>) -> axum::response::Response {
    let report = service.health().await;
    let status = if report.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}
