//! Project layout resolution.
//!
//! A migration run is always rooted at a project directory. The snapshot and
//! the index database live at fixed names under that root, so configuration
//! is a matter of deriving paths, not parsing files.

use std::path::{Path, PathBuf};

/// Resolved file locations for one project.
#[derive(Debug, Clone)]
pub struct Config {
    /// Project root directory.
    pub project_root: PathBuf,
    /// Narrative-state snapshot: migration source and rewrite target.
    pub state_file: PathBuf,
    /// SQLite database receiving the migrated records.
    pub index_db: PathBuf,
}

impl Config {
    /// Derive the standard file layout under a project root.
    pub fn from_project_root<P: AsRef<Path>>(root: P) -> Self {
        let project_root = root.as_ref().to_path_buf();
        let state_file = project_root.join("state.json");
        let index_db = project_root.join("index.db");
        Self {
            project_root,
            state_file,
            index_db,
        }
    }
}
