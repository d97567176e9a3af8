//! Record kinds migrated into the store, one parse function per kind.
//!
//! Snapshot sections are loosely typed: every field read applies a default,
//! and several fields accept a legacy key name kept for files written by
//! older tooling. Each parse function classifies one raw element as either a
//! validated record or a [`RecordRejection`] the caller counts as skipped,
//! so a malformed element never aborts the pass it sits in.

use serde_json::{Map, Value};
use tracing::debug;

/// Tier assigned to entities that never earned an explicit one.
pub const DEFAULT_TIER: &str = "decorative";
/// Relationship type assumed when none is recorded.
pub const DEFAULT_RELATIONSHIP: &str = "acquainted";

/// Why a raw element did not become a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRejection {
    /// The element is not a mapping.
    InvalidShape,
    /// Mandatory identity fields are missing or empty after legacy-key
    /// fallback.
    MissingIdentity,
}

/// A named story element with durable identity and mutable current state.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub id: String,
    pub entity_type: String,
    pub name: String,
    pub tier: String,
    pub desc: String,
    /// Free-form current state, stored as a JSON document.
    pub current: Map<String, Value>,
    pub first_appearance: i64,
    pub last_appearance: i64,
    pub is_protagonist: bool,
}

/// An alternate name resolving to one entity's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasEntry {
    pub alias: String,
    pub entity_id: String,
    pub entity_type: String,
}

/// An audited mutation of one entity field.
///
/// Old and new values are normalized to text at parse time: bare strings
/// pass through, anything else is rendered as compact JSON, and a missing
/// or null value becomes the empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeRecord {
    pub entity_id: String,
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub reason: String,
    pub chapter: i64,
}

/// A directed, typed link between two entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipRecord {
    pub from_entity: String,
    pub to_entity: String,
    pub rel_type: String,
    pub description: String,
    pub chapter: i64,
}

/// Parse one `(id, raw)` pair from an entity collection.
///
/// The display name falls back from `canonical_name` to `name` to the id
/// itself, so an entity always has one.
pub fn parse_entity(
    entity_type: &str,
    id: &str,
    raw: &Value,
) -> Result<EntityRecord, RecordRejection> {
    let fields = raw.as_object().ok_or(RecordRejection::InvalidShape)?;
    if id.is_empty() || entity_type.is_empty() {
        return Err(RecordRejection::MissingIdentity);
    }

    let name = str_field(fields, "canonical_name")
        .or_else(|| str_field(fields, "name"))
        .unwrap_or_else(|| id.to_string());

    Ok(EntityRecord {
        id: id.to_string(),
        entity_type: entity_type.to_string(),
        name,
        tier: str_field(fields, "tier").unwrap_or_else(|| DEFAULT_TIER.to_string()),
        desc: str_field(fields, "desc").unwrap_or_default(),
        current: fields
            .get("current")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        first_appearance: int_field(fields, "first_appearance"),
        last_appearance: int_field(fields, "last_appearance"),
        is_protagonist: fields
            .get("is_protagonist")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// Parse one referent from an alias-index entry list.
pub fn parse_alias(alias: &str, raw: &Value) -> Result<AliasEntry, RecordRejection> {
    let fields = raw.as_object().ok_or(RecordRejection::InvalidShape)?;
    let entity_id = str_field(fields, "id").unwrap_or_default();
    let entity_type = str_field(fields, "type").unwrap_or_default();
    if alias.is_empty() || entity_id.is_empty() || entity_type.is_empty() {
        return Err(RecordRejection::MissingIdentity);
    }
    Ok(AliasEntry {
        alias: alias.to_string(),
        entity_id,
        entity_type,
    })
}

/// Parse one element of the state-change list.
pub fn parse_state_change(raw: &Value) -> Result<StateChangeRecord, RecordRejection> {
    let fields = raw.as_object().ok_or(RecordRejection::InvalidShape)?;
    let entity_id = str_field(fields, "entity_id").unwrap_or_default();
    if entity_id.is_empty() {
        return Err(RecordRejection::MissingIdentity);
    }
    Ok(StateChangeRecord {
        entity_id,
        field: str_field(fields, "field").unwrap_or_default(),
        old_value: value_text(fields, "old", "old_value"),
        new_value: value_text(fields, "new", "new_value"),
        reason: str_field(fields, "reason").unwrap_or_default(),
        chapter: int_field(fields, "chapter"),
    })
}

/// Parse one element of the structured relationship list.
pub fn parse_relationship(raw: &Value) -> Result<RelationshipRecord, RecordRejection> {
    let fields = raw.as_object().ok_or(RecordRejection::InvalidShape)?;
    let from_entity = legacy_str(fields, "from", "from_entity");
    let to_entity = legacy_str(fields, "to", "to_entity");
    if from_entity.is_empty() || to_entity.is_empty() {
        return Err(RecordRejection::MissingIdentity);
    }
    Ok(RelationshipRecord {
        from_entity,
        to_entity,
        rel_type: str_field(fields, "type").unwrap_or_else(|| DEFAULT_RELATIONSHIP.to_string()),
        description: str_field(fields, "description").unwrap_or_default(),
        chapter: int_field(fields, "chapter"),
    })
}

/// String field accessor. Non-string values read as absent so the caller's
/// fallback chain keeps going.
fn str_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Integer field accessor, defaulting to 0.
fn int_field(fields: &Map<String, Value>, key: &str) -> i64 {
    fields.get(key).and_then(Value::as_i64).unwrap_or(0)
}

/// Identity string under its current key, falling back to the legacy key
/// only when the current key is absent. As in [`value_text`], a present key
/// wins even when its value is null; a null or non-string identity resolves
/// to the empty string and fails the caller's identity check.
fn legacy_str(fields: &Map<String, Value>, key: &str, legacy: &str) -> String {
    let value = match fields.get(key) {
        Some(v) => Some(v),
        None => {
            let v = fields.get(legacy);
            if v.is_some() {
                debug!("resolved legacy key {:?} for {:?}", legacy, key);
            }
            v
        }
    };
    value
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}

/// Change value under its current key, falling back to the legacy key, then
/// normalized to text. A key that is present wins even when its value is
/// null.
fn value_text(fields: &Map<String, Value>, key: &str, legacy: &str) -> String {
    let value = match fields.get(key) {
        Some(v) => Some(v),
        None => {
            let v = fields.get(legacy);
            if v.is_some() {
                debug!("resolved legacy key {:?} for {:?}", legacy, key);
            }
            v
        }
    };
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
