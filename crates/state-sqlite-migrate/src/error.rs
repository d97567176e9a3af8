//! Error types for the migration library.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Invocation or project-layout problems.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The source document exists but could not be read as a JSON object.
    #[error("Invalid state document {}: {message}", .path.display())]
    Document { path: PathBuf, message: String },

    /// The pre-migration backup could not be written.
    #[error("Backup failed for {}: {source}", .path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The slim residual document could not replace the snapshot.
    #[error("Rewrite failed for {}: {source}", .path.display())]
    Rewrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Store adapter errors.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// JSON serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO errors (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Map the error to a process exit code.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) => 1,
            MigrateError::Document { .. } => 2,
            MigrateError::Backup { .. } => 3,
            MigrateError::Rewrite { .. } => 4,
            MigrateError::Store(_) => 5,
            MigrateError::Json(_) => 6,
            MigrateError::Io(_) => 7,
        }
    }

    /// Format the error with its full source chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}", self);
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\n\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }
        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
