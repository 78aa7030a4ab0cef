//! Queued command model and its lifecycle state machine.

use core::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{CommandId, GroupId};

/// Response recorded on a skip when the agent did not supply one.
pub const DEFAULT_SKIP_RESPONSE: &str = "Player not online on this server";

/// Response recorded on a failure when the agent did not supply one.
pub const DEFAULT_FAILURE_RESPONSE: &str = "Unknown error";

/// Response written on siblings cancelled because another sibling executed.
pub const AUTO_CANCEL_RESPONSE: &str = "Auto-cancelled: executed on another server";

/// Upper bound for `expiryHours` (ten years).
pub const MAX_EXPIRY_HOURS: u32 = 87_600;

/// How an agent should treat a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    /// Run as soon as polled.
    Instant,
    /// Run only while `player` is online on the target server.
    RequireOnline,
    /// Fan out to every server of the network; the first server with the
    /// player online executes it, the others are cancelled.
    BroadcastOnline,
}

impl ExecutionType {
    pub const ALL: [ExecutionType; 3] = [
        ExecutionType::Instant,
        ExecutionType::RequireOnline,
        ExecutionType::BroadcastOnline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionType::Instant => "INSTANT",
            ExecutionType::RequireOnline => "REQUIRE_ONLINE",
            ExecutionType::BroadcastOnline => "BROADCAST_ONLINE",
        }
    }

    pub fn requires_player(&self) -> bool {
        matches!(
            self,
            ExecutionType::RequireOnline | ExecutionType::BroadcastOnline
        )
    }
}

impl core::fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExecutionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::unknown_variant("executionType", s))
    }
}

/// Command lifecycle status.
///
/// `Pending` and `Queued` are the only non-terminal states. `Queued` is kept
/// as a reserved alias of `Pending`: it is accepted everywhere `Pending` is,
/// but nothing in the engine produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending,
    Queued,
    Executed,
    Failed,
    Cancelled,
    Skipped,
    Expired,
}

impl CommandStatus {
    pub const ALL: [CommandStatus; 7] = [
        CommandStatus::Pending,
        CommandStatus::Queued,
        CommandStatus::Executed,
        CommandStatus::Failed,
        CommandStatus::Cancelled,
        CommandStatus::Skipped,
        CommandStatus::Expired,
    ];

    pub const NON_TERMINAL: [CommandStatus; 2] = [CommandStatus::Pending, CommandStatus::Queued];

    pub const TERMINAL: [CommandStatus; 5] = [
        CommandStatus::Executed,
        CommandStatus::Failed,
        CommandStatus::Cancelled,
        CommandStatus::Skipped,
        CommandStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "PENDING",
            CommandStatus::Queued => "QUEUED",
            CommandStatus::Executed => "EXECUTED",
            CommandStatus::Failed => "FAILED",
            CommandStatus::Cancelled => "CANCELLED",
            CommandStatus::Skipped => "SKIPPED",
            CommandStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Pending | CommandStatus::Queued)
    }

    /// Whether reaching this status stamps `executed_at`.
    pub fn records_execution(&self) -> bool {
        matches!(
            self,
            CommandStatus::Executed | CommandStatus::Failed | CommandStatus::Skipped
        )
    }

    /// Check that `self -> target` is an edge of the state machine.
    ///
    /// Only edges out of a non-terminal state into a terminal one exist.
    /// Callers that race on the same row still go through a conditional
    /// write; this only rejects targets that can never be valid.
    pub fn check_transition(&self, target: CommandStatus) -> DomainResult<()> {
        if !target.is_terminal() {
            return Err(DomainError::InvalidTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            });
        }
        Ok(())
    }
}

impl core::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| DomainError::unknown_variant("status", s))
    }
}

/// A queued command (one row of the command table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: CommandId,
    pub server_id: String,
    pub game_mode: Option<String>,
    /// Opaque instruction text, never interpreted here.
    #[serde(rename = "command")]
    pub command_text: String,
    pub player: Option<String>,
    pub execution_type: ExecutionType,
    pub status: CommandStatus,
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub group_id: Option<GroupId>,
}

/// Validated creation input for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommand {
    pub server_id: String,
    pub game_mode: Option<String>,
    pub command_text: String,
    pub player: Option<String>,
    pub execution_type: ExecutionType,
    /// Hours until expiry; `None` uses the configured default.
    pub expiry_hours: Option<u32>,
}

impl NewCommand {
    /// Build from loosely-typed input, checking required fields.
    ///
    /// Empty strings count as missing. Whether `server_id` names a known
    /// server is checked by the caller, which owns the registry.
    pub fn parse(
        server_id: Option<String>,
        game_mode: Option<String>,
        command_text: Option<String>,
        player: Option<String>,
        execution_type: Option<String>,
        expiry_hours: Option<u32>,
    ) -> DomainResult<Self> {
        let server_id = non_empty(server_id);
        let command_text = non_empty(command_text);
        let execution_type = non_empty(execution_type);

        let (Some(server_id), Some(command_text), Some(execution_type)) =
            (server_id, command_text, execution_type)
        else {
            return Err(DomainError::validation(
                "missing required fields: serverId, command, executionType",
            ));
        };

        let execution_type: ExecutionType = execution_type.parse().map_err(|_| {
            DomainError::validation(format!(
                "invalid executionType; must be one of: {}",
                ExecutionType::ALL.map(|t| t.as_str()).join(", ")
            ))
        })?;

        let new = Self {
            server_id,
            game_mode: non_empty(game_mode),
            command_text,
            player: non_empty(player),
            execution_type,
            expiry_hours,
        };
        new.validate()?;
        Ok(new)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.server_id.trim().is_empty() || self.command_text.trim().is_empty() {
            return Err(DomainError::validation(
                "missing required fields: serverId, command, executionType",
            ));
        }
        if self.execution_type.requires_player() && self.player.is_none() {
            return Err(DomainError::validation(format!(
                "player is required for {} execution type",
                self.execution_type
            )));
        }
        if self.expiry_hours.is_some_and(|h| h > MAX_EXPIRY_HOURS) {
            return Err(DomainError::validation(format!(
                "expiryHours out of range; must be at most {MAX_EXPIRY_HOURS}"
            )));
        }
        Ok(())
    }

    /// Materialize a pending row at `now`. Expiry saturates at the latest
    /// representable instant.
    pub fn into_command(
        self,
        now: DateTime<Utc>,
        default_expiry_hours: u32,
        group_id: Option<GroupId>,
    ) -> Command {
        let hours = self.expiry_hours.unwrap_or(default_expiry_hours);
        Command {
            id: CommandId::new(),
            server_id: self.server_id,
            game_mode: self.game_mode,
            command_text: self.command_text,
            player: self.player,
            execution_type: self.execution_type,
            status: CommandStatus::Pending,
            response: None,
            created_at: now,
            executed_at: None,
            expires_at: now
                .checked_add_signed(Duration::hours(i64::from(hours)))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            group_id,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Command {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the row is overdue for expiry at `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && now > self.expires_at
    }

    /// In-place conditional transition.
    ///
    /// Mirrors the store's guarded update: applies only while the row is
    /// non-terminal and returns whether it applied. `response` is written only
    /// when supplied, so cancelling does not clear an earlier value.
    pub fn apply_transition(
        &mut self,
        target: CommandStatus,
        response: Option<String>,
        at: DateTime<Utc>,
    ) -> bool {
        if self.is_terminal() || !target.is_terminal() {
            return false;
        }
        self.status = target;
        if response.is_some() {
            self.response = response;
        }
        if target.records_execution() {
            self.executed_at = Some(at);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn new_instant(server: &str) -> NewCommand {
        NewCommand {
            server_id: server.to_string(),
            game_mode: None,
            command_text: "say hi".to_string(),
            player: None,
            execution_type: ExecutionType::Instant,
            expiry_hours: None,
        }
    }

    #[test]
    fn parse_requires_fields() {
        let err = NewCommand::parse(
            Some("lobby".into()),
            None,
            None,
            None,
            Some("INSTANT".into()),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref m) if m.contains("missing")));
    }

    #[test]
    fn parse_rejects_unknown_execution_type() {
        let err = NewCommand::parse(
            Some("lobby".into()),
            None,
            Some("say hi".into()),
            None,
            Some("SOMETIMES".into()),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref m) if m.contains("executionType")));
    }

    #[test]
    fn player_required_for_online_types() {
        for ty in ["REQUIRE_ONLINE", "BROADCAST_ONLINE"] {
            let err = NewCommand::parse(
                Some("lobby".into()),
                None,
                Some("give diamond".into()),
                Some("   ".into()),
                Some(ty.into()),
                None,
            )
            .unwrap_err();
            assert!(matches!(err, DomainError::Validation(ref m) if m.contains("player")));
        }
    }

    #[test]
    fn into_command_computes_expiry() {
        let now = Utc::now();
        let cmd = new_instant("lobby").into_command(now, 24, None);
        assert_eq!(cmd.status, CommandStatus::Pending);
        assert_eq!(cmd.expires_at, now + Duration::hours(24));

        let mut zero = new_instant("lobby");
        zero.expiry_hours = Some(0);
        let cmd = zero.into_command(now, 24, None);
        assert_eq!(cmd.expires_at, now);
        assert!(!cmd.is_overdue(now));
        assert!(cmd.is_overdue(now + Duration::seconds(1)));
    }

    #[test]
    fn oversized_expiry_is_rejected_not_panicking() {
        let err = NewCommand::parse(
            Some("lobby".into()),
            None,
            Some("say hi".into()),
            None,
            Some("INSTANT".into()),
            Some(u32::MAX),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(ref m) if m.contains("expiryHours")));

        let mut at_cap = new_instant("lobby");
        at_cap.expiry_hours = Some(MAX_EXPIRY_HOURS);
        assert!(at_cap.validate().is_ok());

        let now = Utc::now();
        let mut huge = new_instant("lobby");
        huge.expiry_hours = Some(u32::MAX);
        let cmd = huge.into_command(now, 24, None);
        assert_eq!(cmd.expires_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn execution_stamps_executed_at_but_cancel_does_not() {
        let now = Utc::now();
        let mut a = new_instant("lobby").into_command(now, 24, None);
        assert!(a.apply_transition(CommandStatus::Executed, Some("ok".into()), now));
        assert_eq!(a.executed_at, Some(now));
        assert_eq!(a.response.as_deref(), Some("ok"));

        let mut b = new_instant("lobby").into_command(now, 24, None);
        assert!(b.apply_transition(CommandStatus::Cancelled, None, now));
        assert_eq!(b.executed_at, None);
    }

    #[test]
    fn status_strings_roundtrip() {
        for st in CommandStatus::ALL {
            assert_eq!(st.as_str().parse::<CommandStatus>().unwrap(), st);
        }
        assert!("DONE".parse::<CommandStatus>().is_err());
        assert_eq!(
            serde_json::to_value(CommandStatus::Executed).unwrap(),
            serde_json::json!("EXECUTED")
        );
    }

    #[test]
    fn queued_behaves_like_pending() {
        let now = Utc::now();
        let mut cmd = new_instant("lobby").into_command(now, 24, None);
        cmd.status = CommandStatus::Queued;
        assert!(!cmd.is_terminal());
        assert!(cmd.apply_transition(CommandStatus::Skipped, None, now));
    }

    fn any_status() -> impl Strategy<Value = CommandStatus> {
        prop::sample::select(CommandStatus::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the first terminal transition wins and nothing after it
        /// changes status, response, or executed_at.
        #[test]
        fn terminal_status_is_sticky(targets in prop::collection::vec(any_status(), 1..12)) {
            let now = Utc::now();
            let mut cmd = new_instant("lobby").into_command(now, 24, None);

            let mut winner: Option<CommandStatus> = None;
            for (i, target) in targets.into_iter().enumerate() {
                let at = now + Duration::seconds(i as i64);
                let applied = cmd.apply_transition(target, Some(format!("r{i}")), at);
                match winner {
                    Some(_) => prop_assert!(!applied),
                    None if target.is_terminal() => {
                        prop_assert!(applied);
                        winner = Some(target);
                    }
                    None => prop_assert!(!applied),
                }
            }

            match winner {
                Some(st) => prop_assert_eq!(cmd.status, st),
                None => prop_assert_eq!(cmd.status, CommandStatus::Pending),
            }
        }
    }
}
