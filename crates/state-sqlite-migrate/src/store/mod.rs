//! Store adapters for the four migrated record kinds.
//!
//! The engine writes through the [`StateStore`] trait without knowing the
//! concrete backend. [`SqliteStore`] is the durable implementation;
//! [`NoopStore`] stands in when nothing may be written.

mod noop;
mod sqlite;

pub use noop::NoopStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::record::{AliasEntry, EntityRecord, RelationshipRecord, StateChangeRecord};

/// Write interface consumed by the migration engine.
///
/// Every operation must be safe to repeat with the same logical key: upserts
/// are last-write-wins on their natural identity, appends deduplicate on the
/// full record. This is what makes a re-run of the migration harmless.
pub trait StateStore {
    /// Insert or update an entity keyed by `(id, type)`.
    fn upsert_entity(&mut self, entity: &EntityRecord) -> Result<()>;

    /// Record an alias referent; repeated registrations are no-ops.
    fn register_alias(&mut self, entry: &AliasEntry) -> Result<()>;

    /// Append an audited state change; exact duplicates are dropped.
    fn record_state_change(&mut self, change: &StateChangeRecord) -> Result<()>;

    /// Insert or update a directed relationship keyed by `(from, to)`.
    fn upsert_relationship(&mut self, rel: &RelationshipRecord) -> Result<()>;
}
