use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, RawPathParams, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

use rconq_auth::authenticate;
use rconq_infra::NetworkRegistry;

use crate::app::errors;
use crate::context::IdentityContext;

pub const API_TOKEN_HEADER: &str = "x-api-token";
pub const SERVER_NAME_HEADER: &str = "x-server-name";
pub const SERVER_NAME_PARAM: &str = "server_name";

#[derive(Clone)]
pub struct AuthState {
    pub credentials: Arc<NetworkRegistry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Resolve the caller's identity and attach it to the request.
///
/// Must be installed with `route_layer` so the matched path parameters are
/// visible.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    params: Option<RawPathParams>,
    query: Option<Query<TokenQuery>>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = extract_token(req.headers()).or_else(|| query.and_then(|Query(q)| q.token));
    let server = params
        .as_ref()
        .and_then(|p| {
            p.iter()
                .find(|(name, _)| *name == SERVER_NAME_PARAM)
                .map(|(_, value)| value.to_string())
        })
        .or_else(|| header_value(req.headers(), SERVER_NAME_HEADER));

    match authenticate(&*state.credentials, token.as_deref(), server.as_deref()) {
        Ok(identity) => {
            req.extensions_mut().insert(IdentityContext::new(identity));
            next.run(req).await
        }
        Err(err) => errors::auth_error_to_response(err),
    }
}

/// Answer 408 when a handler does not finish within the configured budget.
pub async fn timeout_middleware(
    State(timeout): State<Duration>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    match tokio::time::timeout(timeout, next.run(req)).await {
        Ok(res) => res,
        Err(_) => {
            tracing::warn!(%path, timeout_ms = timeout.as_millis() as u64, "request timed out");
            errors::json_error(StatusCode::REQUEST_TIMEOUT, "request_timeout", "Request timeout")
        }
    }
}

/// `Authorization: Bearer <t>`, then `X-Api-Token`.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    bearer
        .map(str::to_string)
        .or_else(|| header_value(headers, API_TOKEN_HEADER))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
