//! Infrastructure layer: command store, pending cache, server registry,
//! broadcast coordination, lifecycle sweeper, configuration.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod registry;
pub mod service;
pub mod store;
pub mod sweeper;

pub use cache::{FillTicket, PendingCache};
pub use config::{Config, ConfigError};
pub use coordinator::{BroadcastCoordinator, BroadcastOutcome, GroupCompletion};
pub use registry::{NetworkRegistry, NetworkSummary, RegistryError, RegistryFile};
pub use service::{
    BulkItemError, BulkOutcome, CommandDraft, CommandError, CommandService, CreateOutcome,
    HealthReport, ListOutcome, NetworkView, PollOutcome, ResolveOutcome, ServerStatus,
    ServiceSettings,
};
pub use store::{
    CommandFilter, CommandStore, InMemoryCommandStore, Page, PostgresCommandStore, StoreError,
};
pub use sweeper::{LifecycleSweeper, SweepReport, SweeperHandle, SweeperStats, retention_cutoff};
