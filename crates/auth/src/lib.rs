//! `rconq-auth`: authentication/authorization boundary.
//!
//! Independent of HTTP and storage.

pub mod authenticate;
pub mod authorize;
pub mod identity;

pub use authenticate::{AuthError, CredentialSource, ServerCredential, authenticate};
pub use authorize::{Action, authorize};
pub use identity::Identity;
