//! Error types for the local store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during local store operations.
#[derive(Error, Debug)]
pub enum StateError {
    /// Failed to open or create the database file.
    #[error("Failed to open database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Failed to create the schema or read its version.
    #[error("Database migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    /// Failed to move an outdated database out of the way.
    #[error("Failed to archive outdated database {path}: {source}")]
    Archive {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A query failed.
    #[error("Database query failed: {0}")]
    Query(String),

    /// An insert collided with an existing row for the same remote id.
    #[error("Media item {remote_id} is already indexed")]
    DuplicateRemoteId { remote_id: String },

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    /// The database schema version is newer than supported.
    #[error("Database schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl StateError {
    /// Create a Query error from a rusqlite error.
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }
}

/// True when `err` is a SQLite constraint violation (unique key, not null, ...).
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
