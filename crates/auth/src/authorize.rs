use crate::{AuthError, Identity};

/// Something a caller wants to do, with the server it touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    /// Create, cancel, fetch, or list commands; inspect or reload the registry.
    Operate,
    /// Read the pending queue of one server.
    Poll { server: &'a str },
    /// Report an outcome for a command addressed to `server`.
    Resolve { server: &'a str },
}

impl Action<'_> {
    fn describe(&self) -> String {
        match self {
            Action::Operate => "operator access required".to_string(),
            Action::Poll { server } => format!("not authorized to poll {server}"),
            Action::Resolve { .. } => "not authorized for this command".to_string(),
        }
    }
}

/// Authorize an identity for an action.
///
/// - No IO
/// - No panics
/// - Master may do anything; a server may only touch itself.
pub fn authorize(identity: &Identity, action: Action<'_>) -> Result<(), AuthError> {
    let allowed = match (identity, action) {
        (Identity::Master, _) => true,
        (Identity::Server { .. }, Action::Operate) => false,
        (Identity::Server { server: own, .. }, Action::Poll { server })
        | (Identity::Server { server: own, .. }, Action::Resolve { server }) => own == server,
    };

    if allowed {
        Ok(())
    } else {
        Err(AuthError::Forbidden(action.describe()))
    }
}
