//! Token authentication.
//!
//! Transport-agnostic: the caller extracts the presented token and the
//! server name it claims to speak for, this module decides who that is.

use thiserror::Error;

use crate::Identity;

/// Credential material for one server, as known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCredential {
    pub network: String,
    pub token: String,
}

/// Source of credentials (master token + per-server network tokens).
pub trait CredentialSource: Send + Sync {
    fn master_token(&self) -> &str;

    /// `None` when the server is not known.
    fn server_credential(&self, server: &str) -> Option<ServerCredential>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing authentication token")]
    MissingToken,

    #[error("missing server name")]
    MissingServerName,

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("invalid token")]
    InvalidToken,

    #[error("forbidden: {0}")]
    Forbidden(String),
}

/// Resolve a presented token into an identity.
///
/// The master token always wins. Otherwise `server` must name a known
/// server and the token must equal that server's network token.
pub fn authenticate<S>(
    source: &S,
    token: Option<&str>,
    server: Option<&str>,
) -> Result<Identity, AuthError>
where
    S: CredentialSource + ?Sized,
{
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;

    if constant_time_eq(token.as_bytes(), source.master_token().as_bytes()) {
        return Ok(Identity::Master);
    }

    let server = server
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::MissingServerName)?;
    let credential = source
        .server_credential(server)
        .ok_or_else(|| AuthError::UnknownServer(server.to_string()))?;

    if constant_time_eq(token.as_bytes(), credential.token.as_bytes()) {
        Ok(Identity::server(server, credential.network))
    } else {
        tracing::debug!(server, "rejected agent token");
        Err(AuthError::InvalidToken)
    }
}

/// Compare secrets without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl CredentialSource for Fixed {
        fn master_token(&self) -> &str {
            "master-secret"
        }

        fn server_credential(&self, server: &str) -> Option<ServerCredential> {
            match server {
                "lobby" | "survival-1" => Some(ServerCredential {
                    network: "default".to_string(),
                    token: "net-token".to_string(),
                }),
                _ => None,
            }
        }
    }

    #[test]
    fn master_token_yields_master_regardless_of_server() {
        assert_eq!(
            authenticate(&Fixed, Some("master-secret"), Some("nope")),
            Ok(Identity::Master)
        );
        assert_eq!(
            authenticate(&Fixed, Some("master-secret"), None),
            Ok(Identity::Master)
        );
    }

    #[test]
    fn network_token_yields_scoped_server() {
        assert_eq!(
            authenticate(&Fixed, Some("net-token"), Some("lobby")),
            Ok(Identity::server("lobby", "default"))
        );
    }

    #[test]
    fn rejections() {
        assert_eq!(
            authenticate(&Fixed, None, Some("lobby")),
            Err(AuthError::MissingToken)
        );
        assert_eq!(
            authenticate(&Fixed, Some("  "), Some("lobby")),
            Err(AuthError::MissingToken)
        );
        assert_eq!(
            authenticate(&Fixed, Some("net-token"), None),
            Err(AuthError::MissingServerName)
        );
        assert_eq!(
            authenticate(&Fixed, Some("net-token"), Some("hub")),
            Err(AuthError::UnknownServer("hub".to_string()))
        );
        assert_eq!(
            authenticate(&Fixed, Some("net-tokem"), Some("lobby")),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn constant_time_eq_checks_length_and_content() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
