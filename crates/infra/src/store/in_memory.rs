use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rconq_core::{AUTO_CANCEL_RESPONSE, Command, CommandId, CommandStatus, GroupId};

use super::query::{CommandFilter, Page};
use super::r#trait::{CommandStore, StoreError, ensure_reportable};

/// In-memory command table.
///
/// Intended for tests/dev. A single `RwLock` makes every operation atomic.
#[derive(Debug, Default)]
pub struct InMemoryCommandStore {
    rows: RwLock<HashMap<CommandId, Command>>,
}

impl InMemoryCommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<CommandId, Command>>, StoreError> {
        self.rows
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<CommandId, Command>>, StoreError> {
        self.rows
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }
}

fn creation_order(a: &Command, b: &Command) -> std::cmp::Ordering {
    a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
}

fn collect_sorted<'a>(rows: impl Iterator<Item = &'a Command>) -> Vec<Command> {
    let mut out: Vec<Command> = rows.cloned().collect();
    out.sort_by(creation_order);
    out
}

#[async_trait::async_trait]
impl CommandStore for InMemoryCommandStore {
    async fn insert_one(&self, command: &Command) -> Result<(), StoreError> {
        self.insert_many(std::slice::from_ref(command)).await
    }

    async fn insert_many(&self, commands: &[Command]) -> Result<(), StoreError> {
        let mut rows = self.write()?;

        // Validate the whole batch before touching the map.
        let mut seen = std::collections::HashSet::with_capacity(commands.len());
        for command in commands {
            if rows.contains_key(&command.id) || !seen.insert(command.id) {
                return Err(StoreError::AlreadyExists(command.id.to_string()));
            }
        }

        for command in commands {
            rows.insert(command.id, command.clone());
        }
        Ok(())
    }

    async fn get_by_id(&self, id: CommandId) -> Result<Option<Command>, StoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn list_pending_by_server(&self, server_id: &str) -> Result<Vec<Command>, StoreError> {
        let rows = self.read()?;
        Ok(collect_sorted(
            rows.values()
                .filter(|c| c.server_id == server_id && !c.is_terminal()),
        ))
    }

    async fn list_by_group(&self, group_id: GroupId) -> Result<Vec<Command>, StoreError> {
        let rows = self.read()?;
        Ok(collect_sorted(
            rows.values().filter(|c| c.group_id == Some(group_id)),
        ))
    }

    async fn transition(
        &self,
        id: CommandId,
        target: CommandStatus,
        response: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        ensure_reportable(target)?;
        let mut rows = self.write()?;
        Ok(rows
            .get_mut(&id)
            .is_some_and(|c| c.apply_transition(target, response.map(str::to_string), at)))
    }

    async fn cancel_group_except(
        &self,
        group_id: GroupId,
        except_id: CommandId,
    ) -> Result<u64, StoreError> {
        let mut rows = self.write()?;
        Ok(cancel_siblings(&mut rows, group_id, except_id))
    }

    async fn execute_exclusive(
        &self,
        id: CommandId,
        group_id: GroupId,
        response: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<u64>, StoreError> {
        let mut rows = self.write()?;
        let applied = rows.get_mut(&id).is_some_and(|c| {
            c.group_id == Some(group_id)
                && c.apply_transition(CommandStatus::Executed, response.map(str::to_string), at)
        });
        if !applied {
            return Ok(None);
        }
        Ok(Some(cancel_siblings(&mut rows, group_id, id)))
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self.write()?;
        let mut expired = 0;
        for command in rows.values_mut().filter(|c| c.is_overdue(now)) {
            if command.apply_transition(CommandStatus::Expired, None, now) {
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self.write()?;
        let before = rows.len();
        rows.retain(|_, c| !(c.is_terminal() && c.created_at < cutoff));
        Ok((before - rows.len()) as u64)
    }

    async fn list(&self, filter: &CommandFilter, page: Page) -> Result<Vec<Command>, StoreError> {
        let rows = self.read()?;
        let mut matching = collect_sorted(rows.values().filter(|c| filter.matches(c)));
        matching.reverse();
        Ok(matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn count(&self, filter: &CommandFilter) -> Result<u64, StoreError> {
        let rows = self.read()?;
        Ok(rows.values().filter(|c| filter.matches(c)).count() as u64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.read().map(|_| ())
    }
}

fn cancel_siblings(
    rows: &mut HashMap<CommandId, Command>,
    group_id: GroupId,
    except_id: CommandId,
) -> u64 {
    let mut cancelled = 0;
    for sibling in rows
        .values_mut()
        .filter(|c| c.group_id == Some(group_id) && c.id != except_id)
    {
        if sibling.apply_transition(
            CommandStatus::Cancelled,
            Some(AUTO_CANCEL_RESPONSE.to_string()),
            Utc::now(),
        ) {
            cancelled += 1;
        }
    }
    cancelled
}
