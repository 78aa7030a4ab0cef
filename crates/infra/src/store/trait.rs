use std::sync::Arc;

use chrono::{DateTime, Utc};
use rconq_core::{Command, CommandId, CommandStatus, DomainError, GroupId};
use thiserror::Error;

use super::query::{CommandFilter, Page};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("command already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<DomainError> for StoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidTransition { .. } => StoreError::InvalidTransition(err.to_string()),
            other => StoreError::Corrupt(other.to_string()),
        }
    }
}

/// Targets a caller may request through [`CommandStore::transition`].
///
/// `EXPIRED` is reserved for [`CommandStore::expire_overdue`].
pub fn ensure_reportable(target: CommandStatus) -> Result<(), StoreError> {
    CommandStatus::Pending.check_transition(target)?;
    if target == CommandStatus::Expired {
        return Err(StoreError::InvalidTransition(
            "EXPIRED is only reachable through the sweeper".to_string(),
        ));
    }
    Ok(())
}

/// Durable table of commands.
///
/// ## Guarantees
///
/// - `insert_many` persists every row or none.
/// - `transition`, `cancel_group_except`, `execute_exclusive` and
///   `expire_overdue` only touch rows whose status is `PENDING` or `QUEUED`.
///   A row that is already terminal is left as is and reported as "not
///   applied"; that is never an error.
/// - `execute_exclusive` moves one grouped row to `EXECUTED` and cancels its
///   non-terminal siblings as one atomic unit, so at most one row per group
///   ever reaches `EXECUTED`.
/// - `purge_before` only deletes terminal rows.
/// - Per-server and per-group listings are in ascending creation order
///   (ties broken by id); `list` is newest first.
#[async_trait::async_trait]
pub trait CommandStore: Send + Sync {
    async fn insert_one(&self, command: &Command) -> Result<(), StoreError>;

    async fn insert_many(&self, commands: &[Command]) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: CommandId) -> Result<Option<Command>, StoreError>;

    async fn list_pending_by_server(&self, server_id: &str) -> Result<Vec<Command>, StoreError>;

    async fn list_by_group(&self, group_id: GroupId) -> Result<Vec<Command>, StoreError>;

    /// Conditionally move `id` to `target`. Returns whether the row changed.
    ///
    /// `response` is written only when supplied. `at` becomes `executed_at`
    /// for `EXECUTED`, `FAILED` and `SKIPPED`.
    async fn transition(
        &self,
        id: CommandId,
        target: CommandStatus,
        response: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Cancel every non-terminal row of `group_id` except `except_id`.
    async fn cancel_group_except(
        &self,
        group_id: GroupId,
        except_id: CommandId,
    ) -> Result<u64, StoreError>;

    /// Group winner step: `id` becomes `EXECUTED` and its non-terminal
    /// siblings `CANCELLED`, atomically.
    ///
    /// Returns `None` when `id` was already terminal (nothing changes), or
    /// `Some(cancelled_siblings)`.
    async fn execute_exclusive(
        &self,
        id: CommandId,
        group_id: GroupId,
        response: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<u64>, StoreError>;

    /// Move every non-terminal row with `now > expires_at` to `EXPIRED`.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Delete terminal rows created strictly before `cutoff`.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn list(&self, filter: &CommandFilter, page: Page) -> Result<Vec<Command>, StoreError>;

    async fn count(&self, filter: &CommandFilter) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<S> CommandStore for Arc<S>
where
    S: CommandStore + ?Sized,
{
    async fn insert_one(&self, command: &Command) -> Result<(), StoreError> {
        (**self).insert_one(command).await
    }

    async fn insert_many(&self, commands: &[Command]) -> Result<(), StoreError> {
        (**self).insert_many(commands).await
    }

    async fn get_by_id(&self, id: CommandId) -> Result<Option<Command>, StoreError> {
        (**self).get_by_id(id).await
    }

    async fn list_pending_by_server(&self, server_id: &str) -> Result<Vec<Command>, StoreError> {
        (**self).list_pending_by_server(server_id).await
    }

    async fn list_by_group(&self, group_id: GroupId) -> Result<Vec<Command>, StoreError> {
        (**self).list_by_group(group_id).await
    }

    async fn transition(
        &self,
        id: CommandId,
        target: CommandStatus,
        response: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        (**self).transition(id, target, response, at).await
    }

    async fn cancel_group_except(
        &self,
        group_id: GroupId,
        except_id: CommandId,
    ) -> Result<u64, StoreError> {
        (**self).cancel_group_except(group_id, except_id).await
    }

    async fn execute_exclusive(
        &self,
        id: CommandId,
        group_id: GroupId,
        response: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<u64>, StoreError> {
        (**self).execute_exclusive(id, group_id, response, at).await
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).expire_overdue(now).await
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).purge_before(cutoff).await
    }

    async fn list(&self, filter: &CommandFilter, page: Page) -> Result<Vec<Command>, StoreError> {
        (**self).list(filter, page).await
    }

    async fn count(&self, filter: &CommandFilter) -> Result<u64, StoreError> {
        (**self).count(filter).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        (**self).health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reportable_targets() {
        assert!(ensure_reportable(CommandStatus::Executed).is_ok());
        assert!(ensure_reportable(CommandStatus::Failed).is_ok());
        assert!(ensure_reportable(CommandStatus::Skipped).is_ok());
        assert!(ensure_reportable(CommandStatus::Cancelled).is_ok());
        assert!(matches!(
            ensure_reportable(CommandStatus::Expired),
            Err(StoreError::InvalidTransition(_))
        ));
        assert!(matches!(
            ensure_reportable(CommandStatus::Queued),
            Err(StoreError::InvalidTransition(_))
        ));
    }
}
