//! Run statistics.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Counters reported by one migration run.
///
/// Each pass produces its own value and the engine folds them together, so
/// no counter is ever shared mutable state between passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStats {
    /// Entity records written (or classified, in a dry run).
    pub entities: u64,
    /// Alias entries registered.
    pub aliases: u64,
    /// State-change records stored.
    pub state_changes: u64,
    /// Relationship records upserted.
    pub relationships: u64,
    /// Elements rejected for shape or identity problems.
    pub skipped: u64,
    /// Per-record store failures.
    pub errors: u64,
}

impl MigrationStats {
    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: MigrationStats) {
        self.entities += other.entities;
        self.aliases += other.aliases;
        self.state_changes += other.state_changes;
        self.relationships += other.relationships;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }

    /// Total records migrated across all four kinds.
    pub fn migrated(&self) -> u64 {
        self.entities + self.aliases + self.state_changes + self.relationships
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
