//! Command store boundary.
//!
//! Every status change goes through a conditional write guarded by
//! "row is still non-terminal", so concurrent reporters race on the store and
//! exactly one of them wins. Implementations must keep that guarantee without
//! relying on in-process locks held by callers.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryCommandStore;
pub use postgres::PostgresCommandStore;
pub use query::{CommandFilter, Page};
pub use r#trait::{CommandStore, StoreError, ensure_reportable};
