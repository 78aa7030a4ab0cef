use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;

use rconq_core::CommandStatus;
use rconq_infra::{CommandService, CreateOutcome, ResolveOutcome};

use crate::app::{dto, errors};
use crate::context::IdentityContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_command).get(list_commands))
        .route("/bulk", post(create_bulk))
        .route("/broadcast", post(create_broadcast))
        .route("/pending/:server_name", get(pending_commands))
        .route("/groups/:group_id", get(get_group))
        .route("/:id", get(get_command).delete(cancel_command))
        .route("/:id/complete", post(complete_command))
        .route("/:id/fail", post(fail_command))
        .route("/:id/skip", post(skip_command))
}

pub async fn create_command(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
    payload: Result<Json<dto::CreateCommandRequest>, JsonRejection>,
) -> axum::response::Response {
    let draft = match dto::json_body(payload) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    match service.create(ctx.identity(), draft).await {
        Ok(CreateOutcome::Single(command)) => (
            StatusCode::CREATED,
            Json(json!({ "success": true, "command": command })),
        )
            .into_response(),
        Ok(CreateOutcome::Broadcast(outcome)) => broadcast_created(outcome),
        Err(e) => errors::command_error_to_response(e),
    }
}

pub async fn create_broadcast(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
    payload: Result<Json<dto::CreateCommandRequest>, JsonRejection>,
) -> axum::response::Response {
    let draft = match dto::json_body(payload) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    match service.broadcast(ctx.identity(), draft).await {
        Ok(outcome) => broadcast_created(outcome),
        Err(e) => errors::command_error_to_response(e),
    }
}

fn broadcast_created(outcome: rconq_infra::BroadcastOutcome) -> axum::response::Response {
    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "groupId": outcome.group_id,
            "network": outcome.network,
            "commands": outcome.commands,
        })),
    )
        .into_response()
}

pub async fn create_bulk(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
    payload: Result<Json<dto::BulkCreateRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::json_body(payload) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match service
        .create_bulk(ctx.identity(), body.commands.unwrap_or_default())
        .await
    {
        Ok(outcome) => {
            let mut body = json!({
                "success": true,
                "created": outcome.created,
                "commands": outcome.commands,
            });
            if !outcome.errors.is_empty() {
                body["errors"] = json!(outcome.errors);
            }
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(e) => errors::command_error_to_response(e),
    }
}

pub async fn pending_commands(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
    Path(server_name): Path<String>,
) -> axum::response::Response {
    match service.poll(ctx.identity(), &server_name).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "commands": outcome.commands,
            "cached": outcome.cached,
        }))
        .into_response(),
        Err(e) => errors::command_error_to_response(e),
    }
}

pub async fn complete_command(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let (id, body) = match parse_resolve(&id, &body) {
        Ok(parts) => parts,
        Err(resp) => return resp,
    };
    resolved(
        service.complete(ctx.identity(), id, body.response()).await,
        CommandStatus::Executed,
    )
}

pub async fn fail_command(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let (id, body) = match parse_resolve(&id, &body) {
        Ok(parts) => parts,
        Err(resp) => return resp,
    };
    resolved(
        service.fail(ctx.identity(), id, body.failure()).await,
        CommandStatus::Failed,
    )
}

pub async fn skip_command(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let (id, body) = match parse_resolve(&id, &body) {
        Ok(parts) => parts,
        Err(resp) => return resp,
    };
    resolved(
        service.skip(ctx.identity(), id, body.response()).await,
        CommandStatus::Skipped,
    )
}

pub async fn cancel_command(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_command_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    resolved(
        service.cancel(ctx.identity(), id).await,
        CommandStatus::Cancelled,
    )
}

fn parse_resolve(
    id: &str,
    body: &Bytes,
) -> Result<(rconq_core::CommandId, dto::ResolveRequest), axum::response::Response> {
    Ok((dto::parse_command_id(id)?, dto::optional_json_body(body)?))
}

fn resolved(
    result: Result<ResolveOutcome, rconq_infra::CommandError>,
    target: CommandStatus,
) -> axum::response::Response {
    match result {
        Ok(outcome) => {
            let message = if outcome.changed {
                format!("Command marked as {target}")
            } else {
                format!("Command already {}", outcome.command.status)
            };
            let mut body = json!({
                "success": true,
                "changed": outcome.changed,
                "message": message,
                "command": outcome.command,
            });
            if outcome.cancelled_siblings > 0 {
                body["cancelledSiblings"] = json!(outcome.cancelled_siblings);
            }
            Json(body).into_response()
        }
        Err(e) => errors::command_error_to_response(e),
    }
}

pub async fn get_command(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_command_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match service.get(ctx.identity(), id).await {
        Ok(command) => Json(json!({ "success": true, "command": command })).into_response(),
        Err(e) => errors::command_error_to_response(e),
    }
}

pub async fn get_group(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
    Path(group_id): Path<String>,
) -> axum::response::Response {
    let group_id = match dto::parse_group_id(&group_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match service.list_group(ctx.identity(), group_id).await {
        Ok(commands) => Json(json!({
            "success": true,
            "groupId": group_id,
            "commands": commands,
        }))
        .into_response(),
        Err(e) => errors::command_error_to_response(e),
    }
}

pub async fn list_commands(
    Extension(service): Extension<Arc<CommandService>>,
    Extension(ctx): Extension<IdentityContext>,
    query: Result<Query<dto::ListCommandsQuery>, QueryRejection>,
) -> axum::response::Response {
    let (filter, page) = match dto::query(query).and_then(dto::ListCommandsQuery::into_parts) {
        Ok(parts) => parts,
        Err(resp) => return resp,
    };
    match service.list(ctx.identity(), filter, page).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "commands": outcome.commands,
            "total": outcome.total,
            "limit": outcome.limit,
            "offset": outcome.offset,
        }))
        .into_response(),
        Err(e) => errors::command_error_to_response(e),
    }
}
