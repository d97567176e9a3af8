//! # state-sqlite-migrate
//!
//! Migrates a narrative project's `state.json` snapshot into a SQLite index
//! (`index.db`), leaving behind a slim residual document.
//!
//! ## Features
//!
//! - **Four record kinds** - entities, aliases, state changes and
//!   relationships, parsed out of loosely-typed sections with per-record
//!   fault isolation
//! - **Idempotent writes** - upserts and deduplicated appends make re-runs
//!   harmless
//! - **Dry-run mode** - every classification step executes, nothing durable
//!   happens
//! - **Timestamped backups** - the snapshot is copied aside before any
//!   mutation
//! - **Slim rewrite** - the residual document is bounded by per-section caps
//!   and recent-tail limits
//!
//! ## Example
//!
//! ```rust,no_run
//! use state_sqlite_migrate::{Config, Migrator, RunOptions, SqliteStore};
//!
//! fn main() -> state_sqlite_migrate::Result<()> {
//!     let config = Config::from_project_root("./my-novel");
//!     let store = SqliteStore::open(&config.index_db)?;
//!     let mut migrator = Migrator::new(config, Box::new(store));
//!
//!     let stats = migrator.run(&RunOptions::default())?;
//!     println!("Migrated {} records", stats.migrated());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod migrator;
pub mod record;
pub mod slim;
pub mod stats;
pub mod store;

// Re-export main types for convenient access
pub use config::Config;
pub use document::StateDocument;
pub use error::{MigrateError, Result};
pub use migrator::{Migrator, RunOptions};
pub use record::{
    AliasEntry, EntityRecord, RecordRejection, RelationshipRecord, StateChangeRecord,
};
pub use slim::SlimDocument;
pub use stats::MigrationStats;
pub use store::{NoopStore, SqliteStore, StateStore};
