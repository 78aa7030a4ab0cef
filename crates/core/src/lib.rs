//! `rconq-core`: command queue domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod clock;
pub mod command;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{
    AUTO_CANCEL_RESPONSE, Command, CommandStatus, DEFAULT_FAILURE_RESPONSE, DEFAULT_SKIP_RESPONSE,
    ExecutionType, MAX_EXPIRY_HOURS, NewCommand,
};
pub use error::{DomainError, DomainResult};
pub use id::{CommandId, GroupId};
