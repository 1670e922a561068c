//! Keeps a UI-facing table configuration layer in sync with a live Postgres schema.
//!
//! This crate provides:
//! - Catalog introspection of the user's tables and columns
//! - A config store, one row per table in `{prefix}tables`
//! - Reconciliation: diff live schema against stored config, then rewrite the
//!   config to match while keeping user customizations
//! - Per-table audit triggers, created and toggled idempotently
//! - An editor path for merged column views and settings saves
//!
//! # Reserved prefix
//!
//! Tables whose name starts with the reserved prefix (`vh_` by default) are
//! the engine's own storage. They never show up as user tables, in diffs, or
//! in stored config.
//!
//! # Synchronizing
//!
//! ```ignore
//! let conn = pool.get().await?;
//! let source = PgIntrospector::new(&conn, schema.clone(), prefix.clone());
//! let store = PgConfigStore::new(&conn, &schema, &prefix)?;
//!
//! let reconciler = Reconciler::new(prefix, Duration::from_secs(30));
//! let result = reconciler.synchronize(&source, &store, &mut ConfigCache::new()).await?;
//! ```
//!
//! `synchronize` holds a transaction-scoped advisory lock for the whole pass,
//! so two passes against the same config table run one after the other.

mod audit;
mod cache;
pub mod config;
mod editor;
mod error;
mod form;
mod introspect;
mod pool;
mod reconcile;
pub mod service;
mod store;
pub mod telemetry;
mod traced;

#[cfg(test)]
mod testing;

pub use audit::{AuditEntry, AuditTriggerManager, AuditTriggerState};
pub use cache::ConfigCache;
pub use config::{ConfigError, EngineConfig};
pub use editor::{
    ColumnSettingsUpdate, DEFAULT_RECENT_CHANGES, TableEditor, TableSettingsUpdate, TableView,
};
pub use error::{BoxError, Error};
pub use form::{FormBlock, FormPayload, FormSync, NoopFormSync};
pub use introspect::{PgIntrospector, SchemaSource};
pub use pool::create_pool;
pub use reconcile::Reconciler;
pub use service::SyncService;
pub use store::{ConfigStore, PgConfigStore};
pub use traced::{Connection, ConnectionExt, DbFuture, Params, TracedConn, TracedPool};

// Re-export the schema and identifier crates for downstream use
pub use vhsync_schema::{self as schema, *};
pub use vhsync_sql::{self as sql, IdentError, ReservedPrefix, SafeIdent};

pub type Result<T> = std::result::Result<T, Error>;
