//! Error types for the sync library.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for dump/sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (bad connection options, invalid identifier, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schema extraction failed.
    #[error("Schema extraction failed: {0}")]
    ExtractFailed(String),

    /// The dominant-composition heuristic could not produce an acyclic tree.
    #[error("Cyclic ownership involving table {0} - no acyclic dominant parent exists")]
    CyclicOwnership(String),

    /// The input document contains `$partial` truncation markers.
    #[error("Input is truncated ({0}) - re-dump without --limit before applying")]
    TruncatedInput(String),

    /// A document key resolved to no known table or nesting edge.
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Three-way sync was requested but the base snapshot is gone.
    #[error("Base snapshot not found at {} - re-dump, or use reset for a two-way apply", .0.display())]
    MissingBase(PathBuf),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Driver(#[from] tokio_postgres::Error),

    /// Input document could not be parsed.
    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    /// An unresolved `$conflict` marker survives in the document.
    #[error("Unresolved conflict marker in table {table}, column {column}")]
    ConflictDetected { table: String, column: String },

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Create a Parse error, pulling line/column out of a serde_json error
    /// when available.
    pub fn parse(path: impl Into<String>, err: &serde_json::Error) -> Self {
        SyncError::Parse {
            path: path.into(),
            message: format!("{} (line {}, column {})", err, err.line(), err.column()),
        }
    }

    /// Format error with full details including the error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
