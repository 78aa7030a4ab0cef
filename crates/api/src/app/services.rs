//! Infrastructure wiring: store selection, registry, cache, service, sweeper.

use std::sync::Arc;

use thiserror::Error;

use rconq_core::{Clock, SystemClock};
use rconq_infra::{
    CommandService, CommandStore, Config, InMemoryCommandStore, LifecycleSweeper,
    NetworkRegistry, PendingCache, PostgresCommandStore, RegistryError, ServiceSettings,
    StoreError,
};

#[derive(Debug, Error)]
pub enum BootError {
    #[error("failed to load server registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("failed to prepare command store: {0}")]
    Store(#[from] StoreError),
}

/// Long-lived components shared by the router and the sweeper.
#[derive(Clone)]
pub struct AppServices {
    pub commands: Arc<CommandService>,
    pub registry: Arc<NetworkRegistry>,
    pub store: Arc<dyn CommandStore>,
    pub cache: Arc<PendingCache>,
    pub clock: Arc<dyn Clock>,
}

impl AppServices {
    /// Wire components around an already-built store and registry.
    pub fn new(
        store: Arc<dyn CommandStore>,
        registry: Arc<NetworkRegistry>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let cache = Arc::new(PendingCache::new(
            config.pending_cache_ttl_ms,
            config.pending_cache_capacity,
            clock.clone(),
        ));
        let commands = Arc::new(CommandService::new(
            store.clone(),
            registry.clone(),
            cache.clone(),
            clock.clone(),
            ServiceSettings {
                default_expiry_hours: config.command_expiry_hours,
                max_bulk_commands: config.max_bulk_commands,
            },
        ));
        Self {
            commands,
            registry,
            store,
            cache,
            clock,
        }
    }

    /// In-memory store, system clock (dev/test).
    pub fn in_memory(registry: NetworkRegistry, config: &Config) -> Self {
        Self::new(
            Arc::new(InMemoryCommandStore::new()),
            Arc::new(registry),
            Arc::new(SystemClock),
            config,
        )
    }

    pub fn sweeper(&self) -> LifecycleSweeper {
        LifecycleSweeper::new(self.store.clone(), self.cache.clone(), self.clock.clone())
    }
}

/// Build services from configuration: Postgres (migrated) when
/// `DATABASE_URL` is set, in-memory otherwise.
pub async fn build_services(config: &Config) -> Result<AppServices, BootError> {
    let registry = NetworkRegistry::load(&config.servers_file, config.master_token.clone())?;

    let store: Arc<dyn CommandStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresCommandStore::connect(url, config.db_max_connections).await?;
            store.migrate().await?;
            tracing::info!(max_connections = config.db_max_connections, "using postgres command store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; commands are kept in memory and lost on restart");
            Arc::new(InMemoryCommandStore::new())
        }
    };

    Ok(AppServices::new(
        store,
        Arc::new(registry),
        Arc::new(SystemClock),
        config,
    ))
}
