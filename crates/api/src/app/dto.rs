use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Json, Query};
use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use rconq_core::{CommandId, CommandStatus, GroupId};
use rconq_infra::{CommandDraft, CommandFilter, NetworkSummary, Page};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// `POST /api/commands` and `POST /api/commands/broadcast`.
pub type CreateCommandRequest = CommandDraft;

#[derive(Debug, Deserialize)]
pub struct BulkCreateRequest {
    #[serde(default)]
    pub commands: Option<Vec<CommandDraft>>,
}

/// Body of complete/fail/skip. Agents may also send the text as `error`.
#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    pub response: Option<String>,
    pub error: Option<String>,
}

impl ResolveRequest {
    pub fn response(self) -> Option<String> {
        self.response.filter(|r| !r.is_empty())
    }

    /// Failure text: `error` first, then `response`.
    pub fn failure(self) -> Option<String> {
        self.error
            .filter(|e| !e.is_empty())
            .or(self.response.filter(|r| !r.is_empty()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCommandsQuery {
    pub server_id: Option<String>,
    pub game_mode: Option<String>,
    pub player: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListCommandsQuery {
    pub fn into_parts(self) -> Result<(CommandFilter, Page), axum::response::Response> {
        let status = match self.status.filter(|s| !s.is_empty()) {
            Some(s) => Some(s.parse::<CommandStatus>().map_err(|_| {
                errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    format!(
                        "invalid status; must be one of: {}",
                        CommandStatus::ALL.map(|s| s.as_str()).join(", ")
                    ),
                )
            })?),
            None => None,
        };
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        Ok((
            CommandFilter {
                server_id: non_empty(self.server_id),
                game_mode: non_empty(self.game_mode),
                player: non_empty(self.player),
                status,
            },
            Page::new(self.limit, self.offset),
        ))
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkCount {
    pub network: String,
    pub server_count: usize,
}

impl From<NetworkSummary> for NetworkCount {
    fn from(n: NetworkSummary) -> Self {
        Self {
            server_count: n.servers.len(),
            network: n.network,
        }
    }
}

// -------------------------
// Extraction helpers
// -------------------------

pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, axum::response::Response> {
    payload.map(|Json(body)| body).map_err(|e| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text())
    })
}

/// Optional JSON body: empty means default, regardless of content type.
pub fn optional_json_body<T>(bytes: &Bytes) -> Result<T, axum::response::Response>
where
    T: DeserializeOwned + Default,
{
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes).map_err(|e| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.to_string())
    })
}

pub fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, axum::response::Response> {
    query.map(|Query(q)| q).map_err(|e| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_query", e.body_text())
    })
}

pub fn parse_command_id(id: &str) -> Result<CommandId, axum::response::Response> {
    id.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid command id"))
}

pub fn parse_group_id(id: &str) -> Result<GroupId, axum::response::Response> {
    id.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid group id"))
}
