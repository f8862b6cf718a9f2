//! Storage layer for identity-association replication.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and the three stores replication relies on:
//!
//! - [`global`]: the global view of associations from every origin server,
//!   including the per-origin watermark.
//! - [`local`]: associations this server created itself.
//! - [`peers`]: how far outbound replication has progressed per remote peer.
//!
//! Store functions take a plain `rusqlite::Connection` so callers decide
//! whether they run on a pooled connection or inside a larger transaction.

mod error;
pub mod global;
pub mod local;
mod migrations;
pub mod peers;
mod pool;

pub use error::StoreError;
pub use global::{
    add_association, add_associations, last_id_from_server, signed_association_for_threepid,
    AddOutcome, ReplicatedAssociation,
};
pub use local::{add_local_association, local_associations_after};
pub use migrations::{run_migrations, MigrationError};
pub use peers::{last_sent_version, set_last_sent_version};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
