//! No-op store.

use super::StateStore;
use crate::error::Result;
use crate::record::{AliasEntry, EntityRecord, RelationshipRecord, StateChangeRecord};

/// Store that accepts every write and keeps nothing.
///
/// Dry runs are wired to this backend so the engine can classify records and
/// produce statistics without any durable effect, not even creating the
/// database file.
#[derive(Debug, Default)]
pub struct NoopStore;

impl NoopStore {
    pub fn new() -> Self {
        Self
    }
}

impl StateStore for NoopStore {
    fn upsert_entity(&mut self, _entity: &EntityRecord) -> Result<()> {
        Ok(())
    }

    fn register_alias(&mut self, _entry: &AliasEntry) -> Result<()> {
        Ok(())
    }

    fn record_state_change(&mut self, _change: &StateChangeRecord) -> Result<()> {
        Ok(())
    }

    fn upsert_relationship(&mut self, _rel: &RelationshipRecord) -> Result<()> {
        Ok(())
    }
}
