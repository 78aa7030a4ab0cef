use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;

use rconq_infra::CommandService;

use crate::app::{dto, errors};
use crate::context::IdentityContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_networks))
        .route("/reload", post(reload_registry))
        .route("/network/:server_name", get(own_network))
        .route("/:server_name/status", get(server_status))
}

pub async fn list_networks(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
) -> axum::response::Response {
    match service.networks(ctx.identity()) {
        Ok(networks) => Json(json!({ "success": true, "networks": networks })).into_response(),
        Err(e) => errors::command_error_to_response(e),
    }
}

pub async fn own_network(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
    Path(server_name): Path<String>,
) -> axum::response::Response {
    match service.own_network(ctx.identity(), &server_name) {
        Ok(view) => Json(json!({
            "success": true,
            "network": view.network,
            "currentServer": view.current_server,
            "servers": view.servers,
        }))
        .into_response(),
        Err(e) => errors::command_error_to_response(e),
    }
}

pub async fn server_status(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
    Path(server_name): Path<String>,
) -> axum::response::Response {
    match service.server_status(ctx.identity(), &server_name) {
        Ok(server) => Json(json!({ "success": true, "server": server })).into_response(),
        Err(e) => errors::command_error_to_response(e),
    }
}

pub async fn reload_registry(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
) -> axum::response::Response {
    match service.reload_registry(ctx.identity()) {
        Ok(networks) => {
            tracing::info!(networks = networks.len(), "server registry reloaded");
            Json(json!({
                "success": true,
                "message": "Server registry reloaded",
                "networks": networks
                    .into_iter()
                    .map(dto::NetworkCount::from)
                    .collect::<Vec<_>>(),
            }))
            .into_response()
        }
        Err(e) => errors::command_error_to_response(e),
    }
}
