//! Broadcast coordination: "send to every server of a network, first
//! executor wins".
//!
//! A broadcast becomes one sibling per member server, all sharing a
//! [`GroupId`] and inserted in one batch. When a sibling completes, the store
//! moves it to `EXECUTED` and cancels the other non-terminal siblings in a
//! single atomic step, so two servers reporting at once cannot both win.

use std::sync::Arc;

use rconq_core::{Clock, Command, ExecutionType, GroupId, NewCommand};
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::PendingCache;
use crate::registry::NetworkRegistry;
use crate::service::CommandError;
use crate::store::{CommandStore, StoreError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastOutcome {
    pub group_id: GroupId,
    pub network: String,
    pub commands: Vec<Command>,
}

/// Result of reporting a grouped command as executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCompletion {
    /// This sibling won; `cancelled` siblings were auto-cancelled.
    Won { cancelled: u64 },
    /// The sibling was already terminal (executed, cancelled by a winner, ...).
    AlreadyResolved,
}

pub struct BroadcastCoordinator {
    store: Arc<dyn CommandStore>,
    registry: Arc<NetworkRegistry>,
    cache: Arc<PendingCache>,
    clock: Arc<dyn Clock>,
    default_expiry_hours: u32,
}

impl BroadcastCoordinator {
    pub fn new(
        store: Arc<dyn CommandStore>,
        registry: Arc<NetworkRegistry>,
        cache: Arc<PendingCache>,
        clock: Arc<dyn Clock>,
        default_expiry_hours: u32,
    ) -> Self {
        Self {
            store,
            registry,
            cache,
            clock,
            default_expiry_hours,
        }
    }

    /// Fan `template` out to every server in the network that owns
    /// `template.server_id`.
    ///
    /// The template's execution type is forced to `BROADCAST_ONLINE`, which
    /// requires a player.
    pub async fn broadcast(&self, template: NewCommand) -> Result<BroadcastOutcome, CommandError> {
        let template = NewCommand {
            execution_type: ExecutionType::BroadcastOnline,
            ..template
        };
        template.validate()?;

        let network = self
            .registry
            .network_of(&template.server_id)
            .ok_or_else(|| CommandError::UnknownServer(template.server_id.clone()))?;
        let members = self.registry.servers_in(&network);

        let group_id = GroupId::new();
        let now = self.clock.now();
        let siblings: Vec<Command> = members
            .into_iter()
            .map(|server| {
                NewCommand {
                    server_id: server,
                    ..template.clone()
                }
                .into_command(now, self.default_expiry_hours, Some(group_id))
            })
            .collect();

        self.store.insert_many(&siblings).await?;
        self.cache.clear();

        info!(
            group_id = %group_id,
            network = %network,
            servers = siblings.len(),
            "broadcast created"
        );

        let commands = self.store.list_by_group(group_id).await?;
        Ok(BroadcastOutcome {
            group_id,
            network,
            commands,
        })
    }

    /// Report a grouped command as executed.
    pub async fn complete(
        &self,
        id: rconq_core::CommandId,
        group_id: GroupId,
        response: Option<&str>,
    ) -> Result<GroupCompletion, StoreError> {
        let outcome = self
            .store
            .execute_exclusive(id, group_id, response, self.clock.now())
            .await?;

        // Siblings live in other servers' cached lists.
        self.cache.clear();

        Ok(match outcome {
            Some(cancelled) => {
                info!(command_id = %id, group_id = %group_id, cancelled, "broadcast executed");
                GroupCompletion::Won { cancelled }
            }
            None => {
                debug!(command_id = %id, group_id = %group_id, "broadcast sibling already resolved");
                GroupCompletion::AlreadyResolved
            }
        })
    }
}
