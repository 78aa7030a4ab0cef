//! Listing filters and pagination.

use rconq_core::{Command, CommandStatus};
use serde::{Deserialize, Serialize};

/// Default page size for listings.
pub const DEFAULT_LIMIT: u32 = 50;
/// Largest page a caller may request.
pub const MAX_LIMIT: u32 = 200;

/// Pagination parameters for command listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    /// Clamp caller input: limit to `1..=200` (default 50), offset default 0.
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

/// Optional equality predicates, combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFilter {
    pub server_id: Option<String>,
    pub game_mode: Option<String>,
    pub player: Option<String>,
    pub status: Option<CommandStatus>,
}

impl CommandFilter {
    pub fn matches(&self, command: &Command) -> bool {
        fn eq(want: &Option<String>, have: Option<&str>) -> bool {
            want.as_deref().is_none_or(|w| have == Some(w))
        }

        eq(&self.server_id, Some(command.server_id.as_str()))
            && eq(&self.game_mode, command.game_mode.as_deref())
            && eq(&self.player, command.player.as_deref())
            && self.status.is_none_or(|s| s == command.status)
    }
}
