//! Database schema definitions and version checks.

use rusqlite::Connection;

use super::error::StateError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Schema DDL for version 1.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS sync_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    remote_id TEXT NOT NULL UNIQUE,
    uid TEXT,
    url TEXT NOT NULL DEFAULT '',
    relative_folder TEXT NOT NULL,
    filename TEXT NOT NULL,
    orig_filename TEXT NOT NULL,
    duplicate_number INTEGER NOT NULL DEFAULT 0,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    mime_type TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    modify_date INTEGER NOT NULL,
    create_date INTEGER NOT NULL,
    sync_date INTEGER NOT NULL,
    downloaded INTEGER NOT NULL DEFAULT 0,
    location TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_files_orig ON sync_files(relative_folder, orig_filename);
CREATE INDEX IF NOT EXISTS idx_sync_files_path ON sync_files(relative_folder, filename);
CREATE INDEX IF NOT EXISTS idx_sync_files_dates ON sync_files(modify_date, create_date);

CREATE TABLE IF NOT EXISTS albums (
    remote_id TEXT PRIMARY KEY NOT NULL,
    album_name TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    start_date INTEGER NOT NULL,
    end_date INTEGER NOT NULL,
    sync_date INTEGER NOT NULL,
    downloaded INTEGER NOT NULL DEFAULT 0,
    is_shared INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS album_files (
    album_remote_id TEXT NOT NULL,
    media_remote_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (album_remote_id, media_remote_id)
);

CREATE TABLE IF NOT EXISTS globals (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_scan_date INTEGER
);
"#;

/// What [`inspect`] found in an opened database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchemaStatus {
    /// Empty database, schema not yet applied.
    Fresh,
    Current,
    /// Written by an older build (or unversioned); must be archived and recreated.
    Outdated(i32),
}

/// Get the current schema version from the database.
pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StateError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version in the database.
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StateError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Classify an opened database. A schema newer than [`SCHEMA_VERSION`] is an
/// error: nothing may be written to it.
pub(crate) fn inspect(conn: &Connection) -> Result<SchemaStatus, StateError> {
    let version = get_schema_version(conn)?;
    if version > SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchemaVersion {
            found: version,
            expected: SCHEMA_VERSION,
        });
    }
    if version == SCHEMA_VERSION {
        return Ok(SchemaStatus::Current);
    }
    let tables: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
        [],
        |row| row.get(0),
    )?;
    if version == 0 && tables == 0 {
        Ok(SchemaStatus::Fresh)
    } else {
        Ok(SchemaStatus::Outdated(version))
    }
}

/// Apply the schema to an empty database.
pub(crate) fn create(conn: &Connection) -> Result<(), StateError> {
    conn.execute_batch(SCHEMA_V1)?;
    conn.execute("INSERT OR IGNORE INTO globals (id) VALUES (1)", [])?;
    set_schema_version(conn, SCHEMA_VERSION)?;
    tracing::debug!("Initialized database schema at version {}", SCHEMA_VERSION);
    Ok(())
}
