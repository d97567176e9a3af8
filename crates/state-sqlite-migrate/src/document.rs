//! Loading and section access for the narrative-state snapshot.
//!
//! The snapshot is a schema-less JSON object. Only the top-level shape is
//! validated at load time; individual sections are looked up by name and
//! shape-checked by their consumers, so one malformed section never blocks
//! the rest of the migration.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{MigrateError, Result};

/// Section holding entity collections keyed by type.
pub const ENTITIES_SECTION: &str = "entities_v3";
/// Section mapping alias strings to lists of referents.
pub const ALIAS_SECTION: &str = "alias_index";
/// Section holding the audited state-change list.
pub const STATE_CHANGES_SECTION: &str = "state_changes";
/// Section holding the structured relationship list.
pub const RELATIONSHIPS_SECTION: &str = "structured_relationships";

/// A loaded `state.json` snapshot.
#[derive(Debug, Clone)]
pub struct StateDocument {
    root: Map<String, Value>,
}

impl StateDocument {
    /// Load a snapshot from disk. The file must parse as a JSON object.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let value: Value =
            serde_json::from_str(&content).map_err(|e| MigrateError::Document {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        match value {
            Value::Object(root) => Ok(Self { root }),
            other => Err(MigrateError::Document {
                path: path.to_path_buf(),
                message: format!(
                    "expected a JSON object at the top level, found {}",
                    json_type_name(&other)
                ),
            }),
        }
    }

    /// Wrap an already-parsed JSON object.
    pub fn from_object(root: Map<String, Value>) -> Self {
        Self { root }
    }

    /// Look up a top-level section by name.
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.root.get(name)
    }

    /// Entity collections keyed by type, when the section is a mapping.
    pub fn entities(&self) -> Option<&Map<String, Value>> {
        self.root.get(ENTITIES_SECTION).and_then(Value::as_object)
    }

    /// Alias index, when the section is a mapping.
    pub fn alias_index(&self) -> Option<&Map<String, Value>> {
        self.root.get(ALIAS_SECTION).and_then(Value::as_object)
    }

    /// State-change list, when the section is a list.
    pub fn state_changes(&self) -> Option<&Vec<Value>> {
        self.root.get(STATE_CHANGES_SECTION).and_then(Value::as_array)
    }

    /// Structured relationship list, when the section is a list.
    pub fn relationships(&self) -> Option<&Vec<Value>> {
        self.root.get(RELATIONSHIPS_SECTION).and_then(Value::as_array)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
