use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use rconq_auth::AuthError;
use rconq_infra::CommandError;

pub fn command_error_to_response(err: CommandError) -> axum::response::Response {
    match err {
        CommandError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        CommandError::UnknownServer(server) => json_error(
            StatusCode::NOT_FOUND,
            "unknown_server",
            format!("Unknown server: {server}"),
        ),
        CommandError::NotFound(what) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
        }
        CommandError::Auth(e) => auth_error_to_response(e),
        CommandError::Store(e) => {
            tracing::error!(error = %e, "store operation failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error",
            )
        }
        CommandError::Registry(e) => {
            tracing::error!(error = %e, "server registry reload failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "registry_error", e.to_string())
        }
    }
}

pub fn auth_error_to_response(err: AuthError) -> axum::response::Response {
    match err {
        AuthError::MissingToken => json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Missing authentication token",
        ),
        AuthError::UnknownServer(server) => json_error(
            StatusCode::NOT_FOUND,
            "unknown_server",
            format!("Unknown server: {server}"),
        ),
        AuthError::MissingServerName | AuthError::InvalidToken => {
            json_error(StatusCode::FORBIDDEN, "invalid_token", "Invalid token")
        }
        AuthError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rconq_infra::StoreError;

    #[test]
    fn status_mapping() {
        let cases = [
            (CommandError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (CommandError::UnknownServer("hub".into()), StatusCode::NOT_FOUND),
            (CommandError::NotFound("command"), StatusCode::NOT_FOUND),
            (CommandError::Auth(AuthError::MissingToken), StatusCode::UNAUTHORIZED),
            (CommandError::Auth(AuthError::InvalidToken), StatusCode::FORBIDDEN),
            (
                CommandError::Auth(AuthError::Forbidden("no".into())),
                StatusCode::FORBIDDEN,
            ),
            (
                CommandError::Store(StoreError::Storage("db down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(command_error_to_response(err).status(), status);
        }
    }
}
