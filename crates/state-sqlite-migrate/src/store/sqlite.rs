//! SQLite-backed store.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::StateStore;
use crate::error::Result;
use crate::record::{AliasEntry, EntityRecord, RelationshipRecord, StateChangeRecord};

/// Current schema version. Bumped whenever the table layout changes.
const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entities (
    id                TEXT NOT NULL,
    type              TEXT NOT NULL,
    name              TEXT NOT NULL,
    tier              TEXT NOT NULL DEFAULT 'decorative',
    description       TEXT NOT NULL DEFAULT '',
    current_json      TEXT NOT NULL DEFAULT '{}',
    first_appearance  INTEGER NOT NULL DEFAULT 0,
    last_appearance   INTEGER NOT NULL DEFAULT 0,
    is_protagonist    INTEGER NOT NULL DEFAULT 0,
    updated_at        TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (id, type)
);

CREATE TABLE IF NOT EXISTS aliases (
    alias        TEXT NOT NULL,
    entity_id    TEXT NOT NULL,
    entity_type  TEXT NOT NULL,
    PRIMARY KEY (alias, entity_id, entity_type)
);

CREATE TABLE IF NOT EXISTS state_changes (
    entity_id  TEXT NOT NULL,
    field      TEXT NOT NULL DEFAULT '',
    old_value  TEXT NOT NULL DEFAULT '',
    new_value  TEXT NOT NULL DEFAULT '',
    reason     TEXT NOT NULL DEFAULT '',
    chapter    INTEGER NOT NULL DEFAULT 0,
    UNIQUE (entity_id, field, old_value, new_value, reason, chapter)
);

CREATE TABLE IF NOT EXISTS relationships (
    from_entity  TEXT NOT NULL,
    to_entity    TEXT NOT NULL,
    type         TEXT NOT NULL DEFAULT 'acquainted',
    description  TEXT NOT NULL DEFAULT '',
    chapter      INTEGER NOT NULL DEFAULT 0,
    updated_at   TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (from_entity, to_entity)
);

CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(type);
CREATE INDEX IF NOT EXISTS idx_aliases_entity ON aliases(entity_id, entity_type);
CREATE INDEX IF NOT EXISTS idx_state_changes_entity ON state_changes(entity_id);
CREATE INDEX IF NOT EXISTS idx_relationships_from ON relationships(from_entity);
CREATE INDEX IF NOT EXISTS idx_relationships_to ON relationships(to_entity);
";

/// SQLite store holding the migrated narrative records.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening index database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Number of entity rows.
    pub fn entity_count(&self) -> Result<i64> {
        self.count("entities")
    }

    /// Number of alias rows.
    pub fn alias_count(&self) -> Result<i64> {
        self.count("aliases")
    }

    /// Number of state-change rows.
    pub fn state_change_count(&self) -> Result<i64> {
        self.count("state_changes")
    }

    /// Number of relationship rows.
    pub fn relationship_count(&self) -> Result<i64> {
        self.count("relationships")
    }

    fn count(&self, table: &str) -> Result<i64> {
        // Table names come from the fixed set above, never from input.
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    /// Fetch one entity by its durable identity.
    pub fn get_entity(&self, id: &str, entity_type: &str) -> Result<Option<EntityRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT name, tier, description, current_json,
                        first_appearance, last_appearance, is_protagonist
                 FROM entities WHERE id = ?1 AND type = ?2",
                params![id, entity_type],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, bool>(6)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((name, tier, desc, current_json, first, last, protagonist)) => {
                let current: Map<String, Value> = serde_json::from_str(&current_json)?;
                Ok(Some(EntityRecord {
                    id: id.to_string(),
                    entity_type: entity_type.to_string(),
                    name,
                    tier,
                    desc,
                    current,
                    first_appearance: first,
                    last_appearance: last,
                    is_protagonist: protagonist,
                }))
            }
        }
    }

    /// All aliases registered for an entity, sorted.
    pub fn aliases_for(&self, entity_id: &str, entity_type: &str) -> Result<Vec<AliasEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT alias, entity_id, entity_type FROM aliases
             WHERE entity_id = ?1 AND entity_type = ?2 ORDER BY alias",
        )?;
        let rows = stmt.query_map(params![entity_id, entity_type], |row| {
            Ok(AliasEntry {
                alias: row.get(0)?,
                entity_id: row.get(1)?,
                entity_type: row.get(2)?,
            })
        })?;

        let mut entries = Vec::new();
        for entry in rows {
            entries.push(entry?);
        }
        Ok(entries)
    }

    /// All state changes recorded for an entity, in chapter order.
    pub fn changes_for(&self, entity_id: &str) -> Result<Vec<StateChangeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, field, old_value, new_value, reason, chapter
             FROM state_changes WHERE entity_id = ?1 ORDER BY chapter, field",
        )?;
        let rows = stmt.query_map(params![entity_id], |row| {
            Ok(StateChangeRecord {
                entity_id: row.get(0)?,
                field: row.get(1)?,
                old_value: row.get(2)?,
                new_value: row.get(3)?,
                reason: row.get(4)?,
                chapter: row.get(5)?,
            })
        })?;

        let mut changes = Vec::new();
        for change in rows {
            changes.push(change?);
        }
        Ok(changes)
    }

    /// Fetch one relationship by its endpoints.
    pub fn get_relationship(
        &self,
        from_entity: &str,
        to_entity: &str,
    ) -> Result<Option<RelationshipRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT type, description, chapter FROM relationships
                 WHERE from_entity = ?1 AND to_entity = ?2",
                params![from_entity, to_entity],
                |row| {
                    Ok(RelationshipRecord {
                        from_entity: from_entity.to_string(),
                        to_entity: to_entity.to_string(),
                        rel_type: row.get(0)?,
                        description: row.get(1)?,
                        chapter: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;
    let version: i64 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?
        .unwrap_or(0);

    if version < SCHEMA_VERSION {
        info!("Initializing index schema v{}", SCHEMA_VERSION);
        conn.execute_batch(SCHEMA)?;
        conn.execute("DELETE FROM schema_version", [])?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
    }
    Ok(())
}

impl StateStore for SqliteStore {
    fn upsert_entity(&mut self, entity: &EntityRecord) -> Result<()> {
        let current_json = serde_json::to_string(&entity.current)?;
        self.conn.execute(
            "INSERT INTO entities (id, type, name, tier, description, current_json,
                                   first_appearance, last_appearance, is_protagonist)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id, type) DO UPDATE SET
                 name = excluded.name,
                 tier = excluded.tier,
                 description = excluded.description,
                 current_json = excluded.current_json,
                 first_appearance = excluded.first_appearance,
                 last_appearance = excluded.last_appearance,
                 is_protagonist = excluded.is_protagonist,
                 updated_at = datetime('now')",
            params![
                entity.id,
                entity.entity_type,
                entity.name,
                entity.tier,
                entity.desc,
                current_json,
                entity.first_appearance,
                entity.last_appearance,
                entity.is_protagonist,
            ],
        )?;
        Ok(())
    }

    fn register_alias(&mut self, entry: &AliasEntry) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO aliases (alias, entity_id, entity_type)
             VALUES (?1, ?2, ?3)",
            params![entry.alias, entry.entity_id, entry.entity_type],
        )?;
        Ok(())
    }

    fn record_state_change(&mut self, change: &StateChangeRecord) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO state_changes
                 (entity_id, field, old_value, new_value, reason, chapter)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                change.entity_id,
                change.field,
                change.old_value,
                change.new_value,
                change.reason,
                change.chapter,
            ],
        )?;
        Ok(())
    }

    fn upsert_relationship(&mut self, rel: &RelationshipRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO relationships (from_entity, to_entity, type, description, chapter)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(from_entity, to_entity) DO UPDATE SET
                 type = excluded.type,
                 description = excluded.description,
                 chapter = excluded.chapter,
                 updated_at = datetime('now')",
            params![
                rel.from_entity,
                rel.to_entity,
                rel.rel_type,
                rel.description,
                rel.chapter,
            ],
        )?;
        Ok(())
    }
}
