use serde::Serialize;

/// Authenticated caller identity.
///
/// `Master` is the operator credential and may act on any command.
/// `Server` is an agent credential scoped to one named server (and the
/// network that server belongs to).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Identity {
    Master,
    Server { server: String, network: String },
}

impl Identity {
    pub fn server(server: impl Into<String>, network: impl Into<String>) -> Self {
        Self::Server {
            server: server.into(),
            network: network.into(),
        }
    }
}
