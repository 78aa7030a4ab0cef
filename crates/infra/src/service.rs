//! Command service: every operation the outer surfaces expose, independent
//! of transport.
//!
//! Validation and authorization happen here, before the store is touched.
//! Status reports that lose a race come back with `changed: false`, never as
//! errors.

use std::sync::Arc;
use std::time::Instant;

use rconq_auth::{Action, AuthError, Identity, authorize};
use rconq_core::{
    Clock, Command, CommandId, CommandStatus, DEFAULT_FAILURE_RESPONSE, DEFAULT_SKIP_RESPONSE,
    DomainError, DomainResult, ExecutionType, GroupId, NewCommand,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::PendingCache;
use crate::coordinator::{BroadcastCoordinator, BroadcastOutcome, GroupCompletion};
use crate::registry::{NetworkRegistry, NetworkSummary, RegistryError};
use crate::store::{CommandFilter, CommandStore, Page, StoreError};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    Validation(String),

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("registry failure: {0}")]
    Registry(#[from] RegistryError),
}

impl From<DomainError> for CommandError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => CommandError::Validation(msg),
            other => CommandError::Validation(other.to_string()),
        }
    }
}

/// Loosely-typed creation input, as received from a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDraft {
    pub server_id: Option<String>,
    pub game_mode: Option<String>,
    pub command: Option<String>,
    pub player: Option<String>,
    pub execution_type: Option<String>,
    pub expiry_hours: Option<u32>,
}

impl CommandDraft {
    pub fn parse(self) -> DomainResult<NewCommand> {
        NewCommand::parse(
            self.server_id,
            self.game_mode,
            self.command,
            self.player,
            self.execution_type,
            self.expiry_hours,
        )
    }
}

#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Single(Command),
    Broadcast(BroadcastOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItemError {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkOutcome {
    pub created: usize,
    pub commands: Vec<Command>,
    pub errors: Vec<BulkItemError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollOutcome {
    pub commands: Vec<Command>,
    pub cached: bool,
}

/// Result of a status report or cancel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveOutcome {
    /// `false` when the command was already terminal.
    pub changed: bool,
    pub command: Command,
    pub cancelled_siblings: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListOutcome {
    pub commands: Vec<Command>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkView {
    pub network: String,
    pub current_server: String,
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub network: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub store: &'static str,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub default_expiry_hours: u32,
    pub max_bulk_commands: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            default_expiry_hours: 24,
            max_bulk_commands: 500,
        }
    }
}

pub struct CommandService {
    store: Arc<dyn CommandStore>,
    registry: Arc<NetworkRegistry>,
    cache: Arc<PendingCache>,
    clock: Arc<dyn Clock>,
    coordinator: BroadcastCoordinator,
    settings: ServiceSettings,
    started: Instant,
}

impl CommandService {
    pub fn new(
        store: Arc<dyn CommandStore>,
        registry: Arc<NetworkRegistry>,
        cache: Arc<PendingCache>,
        clock: Arc<dyn Clock>,
        settings: ServiceSettings,
    ) -> Self {
        let coordinator = BroadcastCoordinator::new(
            store.clone(),
            registry.clone(),
            cache.clone(),
            clock.clone(),
            settings.default_expiry_hours,
        );
        Self {
            store,
            registry,
            cache,
            clock,
            coordinator,
            settings,
            started: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<PendingCache> {
        &self.cache
    }

    /// Create one command. `BROADCAST_ONLINE` fans out to the whole network.
    pub async fn create(
        &self,
        identity: &Identity,
        draft: CommandDraft,
    ) -> Result<CreateOutcome, CommandError> {
        authorize(identity, Action::Operate)?;
        let new = draft.parse()?;
        self.ensure_known(&new.server_id)?;

        if new.execution_type == ExecutionType::BroadcastOnline {
            return Ok(CreateOutcome::Broadcast(self.coordinator.broadcast(new).await?));
        }

        let command = new.into_command(self.clock.now(), self.settings.default_expiry_hours, None);
        self.store.insert_one(&command).await?;
        self.cache.invalidate(&command.server_id);
        debug!(command_id = %command.id, server_id = %command.server_id, "command created");
        Ok(CreateOutcome::Single(command))
    }

    /// Create a broadcast; the execution type is implied.
    pub async fn broadcast(
        &self,
        identity: &Identity,
        mut draft: CommandDraft,
    ) -> Result<BroadcastOutcome, CommandError> {
        authorize(identity, Action::Operate)?;
        draft
            .execution_type
            .get_or_insert_with(|| ExecutionType::BroadcastOnline.as_str().to_string());
        let new = draft.parse()?;
        if new.execution_type != ExecutionType::BroadcastOnline {
            return Err(CommandError::Validation(format!(
                "broadcast requires executionType {}",
                ExecutionType::BroadcastOnline
            )));
        }
        self.ensure_known(&new.server_id)?;
        self.coordinator.broadcast(new).await
    }

    /// Validate each item independently and insert the valid ones as one
    /// atomic batch.
    pub async fn create_bulk(
        &self,
        identity: &Identity,
        drafts: Vec<CommandDraft>,
    ) -> Result<BulkOutcome, CommandError> {
        authorize(identity, Action::Operate)?;
        if drafts.is_empty() {
            return Err(CommandError::Validation(
                "commands must be a non-empty array".to_string(),
            ));
        }
        if drafts.len() > self.settings.max_bulk_commands {
            return Err(CommandError::Validation(format!(
                "maximum {} commands per bulk request",
                self.settings.max_bulk_commands
            )));
        }

        let now = self.clock.now();
        let mut prepared = Vec::with_capacity(drafts.len());
        let mut errors = Vec::new();
        for (index, draft) in drafts.into_iter().enumerate() {
            match self.prepare_bulk_item(draft) {
                Ok(new) => prepared.push(new.into_command(
                    now,
                    self.settings.default_expiry_hours,
                    None,
                )),
                Err(error) => errors.push(BulkItemError { index, error }),
            }
        }

        if !prepared.is_empty() {
            self.store.insert_many(&prepared).await?;
            self.cache.clear();
        }
        info!(created = prepared.len(), rejected = errors.len(), "bulk commands created");

        Ok(BulkOutcome {
            created: prepared.len(),
            commands: prepared,
            errors,
        })
    }

    fn prepare_bulk_item(&self, draft: CommandDraft) -> Result<NewCommand, String> {
        let new = draft.parse().map_err(|e| match e {
            DomainError::Validation(msg) => msg,
            other => other.to_string(),
        })?;
        if new.execution_type == ExecutionType::BroadcastOnline {
            return Err(format!(
                "{} is not supported in bulk requests; use the broadcast endpoint",
                ExecutionType::BroadcastOnline
            ));
        }
        if !self.registry.is_known(&new.server_id) {
            return Err(format!("unknown server: {}", new.server_id));
        }
        Ok(new)
    }

    /// Pending commands for `server_id`, oldest first, read through the cache.
    pub async fn poll(
        &self,
        identity: &Identity,
        server_id: &str,
    ) -> Result<PollOutcome, CommandError> {
        authorize(identity, Action::Poll { server: server_id })?;
        self.ensure_known(server_id)?;

        if let Some(commands) = self.cache.get(server_id) {
            return Ok(PollOutcome {
                commands,
                cached: true,
            });
        }

        let ticket = self.cache.ticket();
        let commands = self.store.list_pending_by_server(server_id).await?;
        self.cache.fill(server_id, ticket, commands.clone());
        Ok(PollOutcome {
            commands,
            cached: false,
        })
    }

    pub async fn complete(
        &self,
        identity: &Identity,
        id: CommandId,
        response: Option<String>,
    ) -> Result<ResolveOutcome, CommandError> {
        self.resolve(identity, id, CommandStatus::Executed, response)
            .await
    }

    pub async fn fail(
        &self,
        identity: &Identity,
        id: CommandId,
        response: Option<String>,
    ) -> Result<ResolveOutcome, CommandError> {
        let response = response.unwrap_or_else(|| DEFAULT_FAILURE_RESPONSE.to_string());
        self.resolve(identity, id, CommandStatus::Failed, Some(response))
            .await
    }

    pub async fn skip(
        &self,
        identity: &Identity,
        id: CommandId,
        response: Option<String>,
    ) -> Result<ResolveOutcome, CommandError> {
        let response = response.unwrap_or_else(|| DEFAULT_SKIP_RESPONSE.to_string());
        self.resolve(identity, id, CommandStatus::Skipped, Some(response))
            .await
    }

    /// Operator cancel. Siblings of a broadcast are left alone.
    pub async fn cancel(
        &self,
        identity: &Identity,
        id: CommandId,
    ) -> Result<ResolveOutcome, CommandError> {
        authorize(identity, Action::Operate)?;
        self.resolve(identity, id, CommandStatus::Cancelled, None)
            .await
    }

    async fn resolve(
        &self,
        identity: &Identity,
        id: CommandId,
        target: CommandStatus,
        response: Option<String>,
    ) -> Result<ResolveOutcome, CommandError> {
        let command = self
            .store
            .get_by_id(id)
            .await?
            .ok_or(CommandError::NotFound("command"))?;
        authorize(
            identity,
            Action::Resolve {
                server: &command.server_id,
            },
        )?;

        let (changed, cancelled_siblings) = match (target, command.group_id) {
            (CommandStatus::Executed, Some(group_id)) => {
                match self
                    .coordinator
                    .complete(id, group_id, response.as_deref())
                    .await?
                {
                    GroupCompletion::Won { cancelled } => (true, cancelled),
                    GroupCompletion::AlreadyResolved => (false, 0),
                }
            }
            _ => {
                let changed = self
                    .store
                    .transition(id, target, response.as_deref(), self.clock.now())
                    .await?;
                (changed, 0)
            }
        };

        if changed {
            self.cache.invalidate(&command.server_id);
        } else {
            debug!(command_id = %id, status = %command.status, "command already resolved");
        }

        // Purged between the two reads: report what we saw.
        let current = self.store.get_by_id(id).await?.unwrap_or(command);
        Ok(ResolveOutcome {
            changed,
            command: current,
            cancelled_siblings,
        })
    }

    pub async fn get(&self, identity: &Identity, id: CommandId) -> Result<Command, CommandError> {
        authorize(identity, Action::Operate)?;
        self.store
            .get_by_id(id)
            .await?
            .ok_or(CommandError::NotFound("command"))
    }

    pub async fn list_group(
        &self,
        identity: &Identity,
        group_id: GroupId,
    ) -> Result<Vec<Command>, CommandError> {
        authorize(identity, Action::Operate)?;
        let commands = self.store.list_by_group(group_id).await?;
        if commands.is_empty() {
            return Err(CommandError::NotFound("group"));
        }
        Ok(commands)
    }

    pub async fn list(
        &self,
        identity: &Identity,
        filter: CommandFilter,
        page: Page,
    ) -> Result<ListOutcome, CommandError> {
        authorize(identity, Action::Operate)?;
        let commands = self.store.list(&filter, page).await?;
        let total = self.store.count(&filter).await?;
        Ok(ListOutcome {
            commands,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    pub fn networks(&self, identity: &Identity) -> Result<Vec<NetworkSummary>, CommandError> {
        authorize(identity, Action::Operate)?;
        Ok(self.registry.networks())
    }

    /// The network `server_id` belongs to, with its members.
    pub fn own_network(
        &self,
        identity: &Identity,
        server_id: &str,
    ) -> Result<NetworkView, CommandError> {
        authorize(identity, Action::Poll { server: server_id })?;
        let network = self
            .registry
            .network_of(server_id)
            .ok_or_else(|| CommandError::UnknownServer(server_id.to_string()))?;
        Ok(NetworkView {
            servers: self.registry.servers_in(&network),
            network,
            current_server: server_id.to_string(),
        })
    }

    pub fn server_status(
        &self,
        identity: &Identity,
        server_id: &str,
    ) -> Result<ServerStatus, CommandError> {
        authorize(identity, Action::Operate)?;
        let network = self
            .registry
            .network_of(server_id)
            .ok_or_else(|| CommandError::UnknownServer(server_id.to_string()))?;
        Ok(ServerStatus {
            name: server_id.to_string(),
            network,
        })
    }

    pub fn reload_registry(&self, identity: &Identity) -> Result<Vec<NetworkSummary>, CommandError> {
        authorize(identity, Action::Operate)?;
        let networks = self.registry.reload()?;
        // Membership may have changed under cached lists.
        self.cache.clear();
        Ok(networks)
    }

    pub async fn health(&self) -> HealthReport {
        let store = match self.store.health_check().await {
            Ok(()) => "ok",
            Err(err) => {
                tracing::warn!(error = %err, "store health check failed");
                "unavailable"
            }
        };
        HealthReport {
            status: if store == "ok" { "ok" } else { "degraded" },
            store,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    fn ensure_known(&self, server_id: &str) -> Result<(), CommandError> {
        if self.registry.is_known(server_id) {
            Ok(())
        } else {
            Err(CommandError::UnknownServer(server_id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryFile;
    use crate::store::InMemoryCommandStore;
    use crate::sweeper::{LifecycleSweeper, retention_cutoff};
    use chrono::{Duration, TimeZone, Utc};
    use rconq_core::{AUTO_CANCEL_RESPONSE, ManualClock};

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryCommandStore>,
        cache: Arc<PendingCache>,
        service: CommandService,
    }

    fn harness() -> Harness {
        // Wednesday.
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 5, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryCommandStore::new());
        let registry = Arc::new(
            NetworkRegistry::from_file(RegistryFile::default_file(), "master").unwrap(),
        );
        let cache = Arc::new(PendingCache::new(1_000, 200, clock.clone()));
        let service = CommandService::new(
            store.clone(),
            registry,
            cache.clone(),
            clock.clone(),
            ServiceSettings {
                default_expiry_hours: 24,
                max_bulk_commands: 3,
            },
        );
        Harness {
            clock,
            store,
            cache,
            service,
        }
    }

    fn draft(server: &str, execution_type: &str, player: Option<&str>) -> CommandDraft {
        CommandDraft {
            server_id: Some(server.to_string()),
            command: Some("say hello".to_string()),
            execution_type: Some(execution_type.to_string()),
            player: player.map(str::to_string),
            ..Default::default()
        }
    }

    fn single(outcome: CreateOutcome) -> Command {
        match outcome {
            CreateOutcome::Single(c) => c,
            CreateOutcome::Broadcast(_) => panic!("expected a single command"),
        }
    }

    #[tokio::test]
    async fn alice_broadcast_scenario() {
        let h = harness();
        let master = Identity::Master;
        let lobby = Identity::server("lobby", "default");
        let skyblock = Identity::server("skyblock-1", "default");

        let outcome = h
            .service
            .create(
                &master,
                CommandDraft {
                    command: Some("tp Alice spawn".to_string()),
                    ..draft("lobby", "BROADCAST_ONLINE", Some("Alice"))
                },
            )
            .await
            .unwrap();
        let CreateOutcome::Broadcast(broadcast) = outcome else {
            panic!("expected a broadcast");
        };
        assert_eq!(broadcast.commands.len(), 3);
        assert!(
            broadcast
                .commands
                .iter()
                .all(|c| c.status == CommandStatus::Pending)
        );

        // Warm the lobby cache.
        let polled = h.service.poll(&lobby, "lobby").await.unwrap();
        assert_eq!(polled.commands.len(), 1);
        assert!(!polled.cached);
        assert!(h.service.poll(&lobby, "lobby").await.unwrap().cached);

        let mine = h.service.poll(&skyblock, "skyblock-1").await.unwrap();
        let outcome = h
            .service
            .complete(&skyblock, mine.commands[0].id, Some("teleported".to_string()))
            .await
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.cancelled_siblings, 2);
        assert_eq!(outcome.command.status, CommandStatus::Executed);
        assert_eq!(outcome.command.response.as_deref(), Some("teleported"));

        let rows = h
            .service
            .list_group(&master, broadcast.group_id)
            .await
            .unwrap();
        for row in rows.iter().filter(|c| c.server_id != "skyblock-1") {
            assert_eq!(row.status, CommandStatus::Cancelled);
            assert_eq!(row.response.as_deref(), Some(AUTO_CANCEL_RESPONSE));
        }

        // Still inside the TTL, but the cached list must not be served.
        let polled = h.service.poll(&lobby, "lobby").await.unwrap();
        assert!(polled.commands.is_empty());
        assert!(!polled.cached);

        // Lobby's late report observes the loss.
        let late = h
            .service
            .complete(&lobby, broadcast.commands.iter().find(|c| c.server_id == "lobby").unwrap().id, None)
            .await
            .unwrap();
        assert!(!late.changed);
        assert_eq!(late.command.status, CommandStatus::Cancelled);
    }

    #[tokio::test]
    async fn zero_expiry_scenario() {
        let h = harness();
        let sweeper = LifecycleSweeper::new(h.store.clone(), h.cache.clone(), h.clock.clone());

        let command = single(
            h.service
                .create(
                    &Identity::Master,
                    CommandDraft {
                        expiry_hours: Some(0),
                        ..draft("lobby", "INSTANT", None)
                    },
                )
                .await
                .unwrap(),
        );
        assert_eq!(command.expires_at, command.created_at);

        // Polling never expires anything by itself.
        h.clock.advance(Duration::minutes(1));
        let polled = h
            .service
            .poll(&Identity::Master, "lobby")
            .await
            .unwrap();
        assert_eq!(polled.commands.len(), 1);

        sweeper.run_once().await;
        let stored = h.service.get(&Identity::Master, command.id).await.unwrap();
        assert_eq!(stored.status, CommandStatus::Expired);
        assert!(
            h.service
                .poll(&Identity::Master, "lobby")
                .await
                .unwrap()
                .commands
                .is_empty()
        );

        // Wednesday's row survives Thursday's cutoff and goes on Friday's.
        h.clock.advance(Duration::days(1));
        assert!(retention_cutoff(h.clock.now()) <= command.created_at);
        sweeper.run_once().await;
        assert!(h.store.get_by_id(command.id).await.unwrap().is_some());

        h.clock.advance(Duration::days(1));
        assert!(retention_cutoff(h.clock.now()) > command.created_at);
        assert_eq!(sweeper.run_once().await.purged, Some(1));
        assert!(h.store.get_by_id(command.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mutation_invalidates_cached_poll() {
        let h = harness();
        let master = Identity::Master;
        let first = single(
            h.service
                .create(&master, draft("lobby", "INSTANT", None))
                .await
                .unwrap(),
        );
        assert_eq!(h.service.poll(&master, "lobby").await.unwrap().commands.len(), 1);

        h.clock.advance(Duration::milliseconds(10));
        let second = single(
            h.service
                .create(&master, draft("lobby", "INSTANT", None))
                .await
                .unwrap(),
        );
        let polled = h.service.poll(&master, "lobby").await.unwrap();
        assert!(!polled.cached);
        let ids: Vec<_> = polled.commands.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);

        h.service.cancel(&master, first.id).await.unwrap();
        let polled = h.service.poll(&master, "lobby").await.unwrap();
        assert_eq!(polled.commands.len(), 1);
        assert_eq!(polled.commands[0].id, second.id);
    }

    #[tokio::test]
    async fn cached_list_expires_after_ttl() {
        let h = harness();
        let master = Identity::Master;
        h.service.poll(&master, "lobby").await.unwrap();
        assert!(h.service.poll(&master, "lobby").await.unwrap().cached);
        h.clock.advance(Duration::milliseconds(1_000));
        assert!(!h.service.poll(&master, "lobby").await.unwrap().cached);
    }

    #[tokio::test]
    async fn reports_default_responses_and_are_idempotent() {
        let h = harness();
        let master = Identity::Master;
        let a = single(h.service.create(&master, draft("lobby", "INSTANT", None)).await.unwrap());
        let b = single(
            h.service
                .create(&master, draft("lobby", "REQUIRE_ONLINE", Some("Bob")))
                .await
                .unwrap(),
        );

        let failed = h.service.fail(&master, a.id, None).await.unwrap();
        assert!(failed.changed);
        assert_eq!(failed.command.response.as_deref(), Some(DEFAULT_FAILURE_RESPONSE));
        assert!(failed.command.executed_at.is_some());

        let skipped = h.service.skip(&master, b.id, None).await.unwrap();
        assert_eq!(skipped.command.response.as_deref(), Some(DEFAULT_SKIP_RESPONSE));

        let again = h.service.complete(&master, a.id, Some("ok".to_string())).await.unwrap();
        assert!(!again.changed);
        assert_eq!(again.command.status, CommandStatus::Failed);
        assert_eq!(again.command.response.as_deref(), Some(DEFAULT_FAILURE_RESPONSE));

        assert!(!h.service.cancel(&master, a.id).await.unwrap().changed);
    }

    #[tokio::test]
    async fn servers_may_only_touch_their_own_commands() {
        let h = harness();
        let master = Identity::Master;
        let lobby = Identity::server("lobby", "default");
        let command = single(
            h.service
                .create(&master, draft("survival-1", "INSTANT", None))
                .await
                .unwrap(),
        );

        assert!(matches!(
            h.service.complete(&lobby, command.id, None).await,
            Err(CommandError::Auth(AuthError::Forbidden(_)))
        ));
        assert!(matches!(
            h.service.poll(&lobby, "survival-1").await,
            Err(CommandError::Auth(AuthError::Forbidden(_)))
        ));
        assert!(matches!(
            h.service.create(&lobby, draft("lobby", "INSTANT", None)).await,
            Err(CommandError::Auth(_))
        ));
        assert!(matches!(
            h.service.cancel(&lobby, command.id).await,
            Err(CommandError::Auth(_))
        ));
        let stored = h.store.get_by_id(command.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CommandStatus::Pending);
    }

    #[tokio::test]
    async fn creation_validation() {
        let h = harness();
        let master = Identity::Master;

        let err = h
            .service
            .create(&master, CommandDraft::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Validation(_)));

        let err = h
            .service
            .create(&master, draft("lobby", "SOMETIMES", None))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Validation(m) if m.contains("INSTANT, REQUIRE_ONLINE, BROADCAST_ONLINE")));

        let err = h
            .service
            .create(&master, draft("nether", "INSTANT", None))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::UnknownServer(s) if s == "nether"));

        let err = h
            .service
            .create(&master, draft("lobby", "REQUIRE_ONLINE", None))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Validation(_)));

        let far_future = CommandDraft {
            expiry_hours: Some(u32::MAX),
            ..draft("lobby", "INSTANT", None)
        };
        let err = h.service.create(&master, far_future).await.unwrap_err();
        assert!(matches!(err, CommandError::Validation(m) if m.contains("expiryHours")));

        assert_eq!(h.store.count(&CommandFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bulk_reports_per_item_errors() {
        let h = harness();
        let master = Identity::Master;
        h.cache.fill("lobby", h.cache.ticket(), Vec::new());

        let outcome = h
            .service
            .create_bulk(
                &master,
                vec![
                    draft("lobby", "INSTANT", None),
                    draft("nether", "INSTANT", None),
                    draft("lobby", "BROADCAST_ONLINE", Some("Alice")),
                ],
            )
            .await
            .unwrap();
        assert_eq!(outcome.created, 1);
        let failed: Vec<_> = outcome.errors.iter().map(|e| e.index).collect();
        assert_eq!(failed, vec![1, 2]);
        assert!(h.cache.is_empty());

        let outcome = h
            .service
            .create_bulk(
                &master,
                vec![
                    CommandDraft {
                        expiry_hours: Some(u32::MAX),
                        ..draft("lobby", "INSTANT", None)
                    },
                    draft("lobby", "INSTANT", None),
                ],
            )
            .await
            .unwrap();
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].index, 0);
        assert!(outcome.errors[0].error.contains("expiryHours"));

        let too_many = vec![draft("lobby", "INSTANT", None); 4];
        assert!(matches!(
            h.service.create_bulk(&master, too_many).await,
            Err(CommandError::Validation(_))
        ));
        assert!(matches!(
            h.service.create_bulk(&master, Vec::new()).await,
            Err(CommandError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn broadcast_endpoint_implies_execution_type() {
        let h = harness();
        let outcome = h
            .service
            .broadcast(
                &Identity::Master,
                CommandDraft {
                    execution_type: None,
                    ..draft("survival-1", "", Some("Alice"))
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.commands.len(), 3);

        let err = h
            .service
            .broadcast(&Identity::Master, draft("lobby", "INSTANT", None))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Validation(_)));
    }

    #[tokio::test]
    async fn listing_and_registry_views() {
        let h = harness();
        let master = Identity::Master;
        for server in ["lobby", "lobby", "survival-1"] {
            h.service
                .create(&master, draft(server, "INSTANT", None))
                .await
                .unwrap();
            h.clock.advance(Duration::seconds(1));
        }

        let listed = h
            .service
            .list(
                &master,
                CommandFilter {
                    server_id: Some("lobby".to_string()),
                    ..Default::default()
                },
                Page::new(Some(1), None),
            )
            .await
            .unwrap();
        assert_eq!(listed.total, 2);
        assert_eq!(listed.commands.len(), 1);
        assert_eq!(listed.limit, 1);

        let view = h
            .service
            .own_network(&Identity::server("lobby", "default"), "lobby")
            .unwrap();
        assert_eq!(view.network, "default");
        assert_eq!(view.servers.len(), 3);

        assert!(matches!(
            h.service.server_status(&master, "nether"),
            Err(CommandError::UnknownServer(_))
        ));
        assert_eq!(h.service.networks(&master).unwrap().len(), 1);
        assert!(matches!(
            h.service.get(&master, CommandId::new()).await,
            Err(CommandError::NotFound("command"))
        ));
        assert!(matches!(
            h.service.list_group(&master, GroupId::new()).await,
            Err(CommandError::NotFound("group"))
        ));
        assert_eq!(h.service.health().await.status, "ok");
    }
}
