//! Slimming transformer for the residual document.
//!
//! After the record passes have drained the heavyweight sections into the
//! store, the snapshot is rewritten as a bounded residual document: narrative
//! context sections carry over, the world settings reduce to a capped
//! skeleton, and audit-flavored lists keep only a recent tail. Everything
//! here is pure; a section of the wrong container type degrades to an empty
//! container instead of failing the rewrite.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::document::StateDocument;

/// Power-tier entries kept in the world-settings skeleton.
pub const POWER_SYSTEM_CAP: usize = 20;
/// Faction entries kept.
pub const FACTION_CAP: usize = 30;
/// Location entries kept.
pub const LOCATION_CAP: usize = 50;
/// Review checkpoints kept, most recent last.
pub const CHECKPOINT_TAIL: usize = 10;
/// Disambiguation warnings kept.
pub const WARNING_TAIL: usize = 20;
/// Pending disambiguation items kept.
pub const PENDING_TAIL: usize = 10;

/// The residual document written back over the snapshot after migration.
#[derive(Debug, Serialize)]
pub struct SlimDocument {
    pub project_info: Value,
    pub progress: Value,
    pub protagonist_state: Value,
    pub strand_tracker: Value,
    pub world_settings: Value,
    pub plot_threads: Value,
    pub relationships: Value,
    pub review_checkpoints: Value,
    pub disambiguation_warnings: Value,
    pub disambiguation_pending: Value,
    #[serde(rename = "_migrated_to_sqlite")]
    pub migrated_to_sqlite: bool,
    #[serde(rename = "_migration_timestamp")]
    pub migration_timestamp: String,
}

impl SlimDocument {
    /// Assemble the residual document from a loaded snapshot.
    pub fn from_state(doc: &StateDocument, timestamp: String) -> Self {
        Self {
            project_info: carry_over(doc.section("project_info")),
            progress: carry_over(doc.section("progress")),
            protagonist_state: carry_over(doc.section("protagonist_state")),
            strand_tracker: carry_over(doc.section("strand_tracker")),
            world_settings: Value::Object(slim_world_settings(doc.section("world_settings"))),
            plot_threads: carry_over(doc.section("plot_threads")),
            relationships: Value::Object(slim_relationships(doc.section("relationships"))),
            review_checkpoints: Value::Array(bounded_tail(
                doc.section("review_checkpoints"),
                CHECKPOINT_TAIL,
            )),
            disambiguation_warnings: Value::Array(bounded_tail(
                doc.section("disambiguation_warnings"),
                WARNING_TAIL,
            )),
            disambiguation_pending: Value::Array(bounded_tail(
                doc.section("disambiguation_pending"),
                PENDING_TAIL,
            )),
            migrated_to_sqlite: true,
            migration_timestamp: timestamp,
        }
    }
}

/// Carry a narrative section through untouched. Absent sections become
/// empty mappings.
pub fn carry_over(section: Option<&Value>) -> Value {
    section.cloned().unwrap_or_else(|| Value::Object(Map::new()))
}

/// Reduce `world_settings` to its bare skeleton: capped `power_system`,
/// `factions` and `locations` lists, nothing else.
pub fn slim_world_settings(section: Option<&Value>) -> Map<String, Value> {
    let empty = Map::new();
    let ws = match section {
        // An absent section slims like an empty mapping.
        None => &empty,
        Some(value) => match value.as_object() {
            Some(map) => map,
            // Wrong container type: an empty skeleton.
            None => return Map::new(),
        },
    };

    let mut slim = Map::new();
    insert_capped(&mut slim, ws, "power_system", POWER_SYSTEM_CAP, bare_name);
    insert_capped(&mut slim, ws, "factions", FACTION_CAP, faction_skeleton);
    insert_capped(&mut slim, ws, "locations", LOCATION_CAP, bare_name);
    slim
}

/// Carry the relationship summary through when it is a mapping.
pub fn slim_relationships(section: Option<&Value>) -> Map<String, Value> {
    section
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Keep the most recent `keep` elements of an ordered list.
pub fn bounded_tail(section: Option<&Value>, keep: usize) -> Vec<Value> {
    match section.and_then(Value::as_array) {
        Some(items) => {
            let start = items.len().saturating_sub(keep);
            items[start..].to_vec()
        }
        None => Vec::new(),
    }
}

/// Cap one world-settings list, keeping the head. An absent list slims to an
/// explicit empty list; a key of the wrong type is left out of the skeleton.
fn insert_capped(
    slim: &mut Map<String, Value>,
    ws: &Map<String, Value>,
    key: &str,
    cap: usize,
    reduce: fn(&Value) -> Value,
) {
    match ws.get(key) {
        None => {
            slim.insert(key.to_string(), Value::Array(Vec::new()));
        }
        Some(Value::Array(items)) => {
            let reduced: Vec<Value> = items.iter().take(cap).map(reduce).collect();
            slim.insert(key.to_string(), Value::Array(reduced));
        }
        Some(_) => {}
    }
}

/// Mapping entries reduce to their `name`; bare values pass through.
fn bare_name(item: &Value) -> Value {
    match item.as_object() {
        Some(map) => map.get("name").cloned().unwrap_or(Value::Null),
        None => item.clone(),
    }
}

/// Faction mappings keep `name` and `type`; bare values pass through.
fn faction_skeleton(item: &Value) -> Value {
    match item.as_object() {
        Some(map) => json!({
            "name": map.get("name").cloned().unwrap_or(Value::Null),
            "type": map.get("type").cloned().unwrap_or(Value::Null),
        }),
        None => item.clone(),
    }
}
