//! Local store trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use rusqlite::{Connection, OptionalExtension};

use super::error::{is_constraint_violation, StateError};
use super::schema::{self, SchemaStatus};
use super::types::{AlbumFileEntry, AlbumRecord, MediaRecord, SearchFilter, StoreSummary};
use crate::types::minimum_date;

/// Rows fetched per query while streaming search results.
const SEARCH_CHUNK: i64 = 500;

const MEDIA_COLUMNS: &str = "id, remote_id, uid, url, relative_folder, filename, orig_filename, \
     duplicate_number, size_bytes, mime_type, description, modify_date, create_date, sync_date, \
     downloaded, location";

const ALBUM_COLUMNS: &str =
    "remote_id, album_name, size, start_date, end_date, sync_date, downloaded, is_shared";

/// Persistent index of remote items, albums, album membership and the scan
/// checkpoint.
///
/// This trait is object-safe and can be used as `Arc<dyn LocalStore>`.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Insert a new row, or update the existing row for the same `remote_id`
    /// when `update` is set. Updates keep the stored local path
    /// (`relative_folder`, `filename`, `orig_filename`), `duplicate_number` and
    /// `downloaded` flag. Returns the row id.
    ///
    /// An insert that collides with an existing `remote_id` is logged and
    /// returned as [`StateError::DuplicateRemoteId`].
    async fn put_row(&self, record: &MediaRecord, update: bool) -> Result<i64, StateError>;

    /// Resolve the duplicate number for a candidate item.
    ///
    /// If `remote_id` is already stored, returns its stored number and row.
    /// Otherwise returns one past the highest number among rows sharing
    /// (`folder`, `orig_filename`), or 0 if there are none.
    async fn file_duplicate_no(
        &self,
        orig_filename: &str,
        folder: &str,
        remote_id: &str,
    ) -> Result<(u32, Option<MediaRecord>), StateError>;

    /// Stream the rows matching `filter` in row id order.
    fn get_rows_by_search(
        &self,
        filter: SearchFilter,
    ) -> BoxStream<'_, Result<MediaRecord, StateError>>;

    /// Look up a row by its local location.
    async fn get_file_by_path(
        &self,
        folder: &str,
        filename: &str,
    ) -> Result<Option<MediaRecord>, StateError>;

    async fn put_downloaded(&self, remote_id: &str) -> Result<(), StateError>;

    async fn downloaded_count(&self) -> Result<u64, StateError>;

    async fn get_scan_date(&self) -> Result<Option<DateTime<Utc>>, StateError>;

    async fn set_scan_date(&self, date: DateTime<Utc>) -> Result<(), StateError>;

    async fn get_album(&self, remote_id: &str) -> Result<Option<AlbumRecord>, StateError>;

    /// Insert or replace an album row.
    async fn put_album(&self, album: &AlbumRecord) -> Result<(), StateError>;

    /// Remove every membership row of an album ahead of a re-index.
    async fn clear_album_files(&self, album_remote_id: &str) -> Result<(), StateError>;

    async fn put_album_file(
        &self,
        album_remote_id: &str,
        media_remote_id: &str,
        position: u32,
    ) -> Result<(), StateError>;

    /// Flag an album's link folder as materialized. The link tree is rebuilt
    /// whole on every run, so the flag only feeds the `status` counts.
    async fn put_album_downloaded(&self, album_remote_id: &str) -> Result<(), StateError>;

    /// Joined album membership rows ordered by album then position
    /// (descending position when `invert`). Unless `download_again` is set,
    /// albums already flagged downloaded are left out.
    async fn get_album_files(
        &self,
        invert: bool,
        download_again: bool,
    ) -> Result<Vec<AlbumFileEntry>, StateError>;

    async fn get_summary(&self) -> Result<StoreSummary, StateError>;
}

/// SQLite implementation of the local store.
pub struct SqliteStore {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    /// No guard is ever held across an await point.
    conn: Mutex<Connection>,
    /// Path to the database file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a database at the given path.
    ///
    /// A database written by an older schema is renamed to `<path>.previous`
    /// and a fresh one is created in its place.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || open_blocking(&path_clone)).await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::create(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }

    fn search_chunk(
        &self,
        filter: &SearchFilter,
        after_id: i64,
    ) -> Result<Vec<MediaRecord>, StateError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {MEDIA_COLUMNS} FROM sync_files \
             WHERE id > ?1 \
               AND (?2 IS NULL OR modify_date >= ?2 OR create_date >= ?2) \
               AND (?3 IS NULL OR modify_date <= ?3) \
               AND (?4 = 0 OR downloaded = 0) \
               AND remote_id LIKE ?5 \
             ORDER BY id LIMIT ?6"
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(StateError::query)?;
        let rows = stmt
            .query_map(
                rusqlite::params![
                    after_id,
                    filter.start_date.map(|d| d.timestamp()),
                    filter.end_date.map(|d| d.timestamp()),
                    filter.skip_downloaded,
                    filter.remote_id_pattern.as_deref().unwrap_or("%"),
                    SEARCH_CHUNK,
                ],
                row_to_media_record,
            )
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;
        Ok(rows)
    }
}

fn open_connection(path: &Path) -> Result<Connection, StateError> {
    Connection::open(path).map_err(|e| StateError::Open {
        path: path.to_path_buf(),
        source: e,
    })
}

fn configure(conn: &Connection) -> Result<(), StateError> {
    // WAL for better read/write interleaving; NORMAL sync is still safe with WAL
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
        .map_err(StateError::Migration)?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(StateError::Migration)?;
    Ok(())
}

fn archive_path(path: &Path) -> PathBuf {
    let mut archived = path.as_os_str().to_owned();
    archived.push(".previous");
    PathBuf::from(archived)
}

fn open_blocking(path: &Path) -> Result<Connection, StateError> {
    let conn = open_connection(path)?;
    match schema::inspect(&conn)? {
        SchemaStatus::Current => {}
        SchemaStatus::Fresh => schema::create(&conn)?,
        SchemaStatus::Outdated(version) => {
            drop(conn);
            let archived = archive_path(path);
            tracing::warn!(
                version,
                current = schema::SCHEMA_VERSION,
                archived = %archived.display(),
                "Database schema is outdated, archiving it and starting a fresh index"
            );
            std::fs::rename(path, &archived).map_err(|source| StateError::Archive {
                path: path.to_path_buf(),
                source,
            })?;
            for sidecar in ["-wal", "-shm"] {
                let mut p = path.as_os_str().to_owned();
                p.push(sidecar);
                let _ = std::fs::remove_file(PathBuf::from(p));
            }
            let conn = open_connection(path)?;
            schema::create(&conn)?;
            configure(&conn)?;
            return Ok(conn);
        }
    }
    configure(&conn)?;
    Ok(conn)
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(minimum_date)
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn put_row(&self, record: &MediaRecord, update: bool) -> Result<i64, StateError> {
        let sync_date = Utc::now().timestamp();
        let conn = self.conn()?;

        if update {
            let changed = conn
                .execute(
                    // The local path, duplicate number and download flag
                    // belong to the file already on disk and are left alone.
                    "UPDATE sync_files SET uid = ?2, url = ?3, size_bytes = ?4, mime_type = ?5, \
                     description = ?6, modify_date = ?7, create_date = ?8, sync_date = ?9, \
                     location = ?10 \
                     WHERE remote_id = ?1",
                    rusqlite::params![
                        record.remote_id,
                        record.uid,
                        record.url,
                        record.size as i64,
                        record.mime_type,
                        record.description,
                        record.modify_date.timestamp(),
                        record.create_date.timestamp(),
                        sync_date,
                        record.location,
                    ],
                )
                .map_err(StateError::query)?;
            if changed > 0 {
                let id = conn
                    .query_row(
                        "SELECT id FROM sync_files WHERE remote_id = ?1",
                        [&record.remote_id],
                        |row| row.get(0),
                    )
                    .map_err(StateError::query)?;
                return Ok(id);
            }
            tracing::debug!(remote_id = %record.remote_id, "No row to update, inserting");
        }

        let inserted = conn.execute(
            "INSERT INTO sync_files (remote_id, uid, url, relative_folder, filename, orig_filename, \
             duplicate_number, size_bytes, mime_type, description, modify_date, create_date, \
             sync_date, downloaded, location) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            rusqlite::params![
                record.remote_id,
                record.uid,
                record.url,
                record.relative_folder,
                record.filename,
                record.orig_filename,
                record.duplicate_number,
                record.size as i64,
                record.mime_type,
                record.description,
                record.modify_date.timestamp(),
                record.create_date.timestamp(),
                sync_date,
                record.downloaded,
                record.location,
            ],
        );
        match inserted {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_constraint_violation(&e) => {
                tracing::error!(
                    remote_id = %record.remote_id,
                    row = ?record,
                    error = %e,
                    "Insert rejected by uniqueness constraint"
                );
                Err(StateError::DuplicateRemoteId {
                    remote_id: record.remote_id.clone(),
                })
            }
            Err(e) => Err(StateError::query(e)),
        }
    }

    async fn file_duplicate_no(
        &self,
        orig_filename: &str,
        folder: &str,
        remote_id: &str,
    ) -> Result<(u32, Option<MediaRecord>), StateError> {
        let conn = self.conn()?;

        let existing = conn
            .query_row(
                &format!("SELECT {MEDIA_COLUMNS} FROM sync_files WHERE remote_id = ?1"),
                [remote_id],
                row_to_media_record,
            )
            .optional()
            .map_err(StateError::query)?;
        if let Some(row) = existing {
            return Ok((row.duplicate_number, Some(row)));
        }

        let max: Option<u32> = conn
            .query_row(
                "SELECT MAX(duplicate_number) FROM sync_files \
                 WHERE relative_folder = ?1 AND orig_filename = ?2",
                [folder, orig_filename],
                |row| row.get(0),
            )
            .map_err(StateError::query)?;
        Ok((max.map_or(0, |n| n + 1), None))
    }

    fn get_rows_by_search(
        &self,
        filter: SearchFilter,
    ) -> BoxStream<'_, Result<MediaRecord, StateError>> {
        // Keyset pagination on the row id so the lock is only held per chunk.
        stream::try_unfold(Some(0i64), move |after| {
            let filter = filter.clone();
            async move {
                let Some(after) = after else {
                    return Ok(None);
                };
                let rows = self.search_chunk(&filter, after)?;
                if rows.is_empty() {
                    return Ok(None);
                }
                let next = if (rows.len() as i64) < SEARCH_CHUNK {
                    None
                } else {
                    rows.last().and_then(|r| r.id)
                };
                Ok::<_, StateError>(Some((rows, next)))
            }
        })
        .map_ok(|rows| stream::iter(rows.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }

    async fn get_file_by_path(
        &self,
        folder: &str,
        filename: &str,
    ) -> Result<Option<MediaRecord>, StateError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {MEDIA_COLUMNS} FROM sync_files WHERE relative_folder = ?1 AND filename = ?2"
            ))
            .map_err(StateError::query)?;
        stmt.query_row([folder, filename], row_to_media_record)
            .optional()
            .map_err(StateError::query)
    }

    async fn put_downloaded(&self, remote_id: &str) -> Result<(), StateError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sync_files SET downloaded = 1 WHERE remote_id = ?1",
            [remote_id],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn downloaded_count(&self) -> Result<u64, StateError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sync_files WHERE downloaded = 1",
                [],
                |row| row.get(0),
            )
            .map_err(StateError::query)?;
        Ok(count as u64)
    }

    async fn get_scan_date(&self) -> Result<Option<DateTime<Utc>>, StateError> {
        let conn = self.conn()?;
        let ts: Option<i64> = conn
            .query_row(
                "SELECT last_scan_date FROM globals WHERE id = 1",
                [],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()
            .map_err(StateError::query)?
            .flatten();
        Ok(ts.map(from_ts))
    }

    async fn set_scan_date(&self, date: DateTime<Utc>) -> Result<(), StateError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO globals (id, last_scan_date) VALUES (1, ?1) \
             ON CONFLICT(id) DO UPDATE SET last_scan_date = excluded.last_scan_date",
            [date.timestamp()],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn get_album(&self, remote_id: &str) -> Result<Option<AlbumRecord>, StateError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {ALBUM_COLUMNS} FROM albums WHERE remote_id = ?1"),
            [remote_id],
            row_to_album_record,
        )
        .optional()
        .map_err(StateError::query)
    }

    async fn put_album(&self, album: &AlbumRecord) -> Result<(), StateError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO albums (remote_id, album_name, size, start_date, end_date, sync_date, downloaded, is_shared) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(remote_id) DO UPDATE SET \
                album_name = excluded.album_name, \
                size = excluded.size, \
                start_date = excluded.start_date, \
                end_date = excluded.end_date, \
                sync_date = excluded.sync_date, \
                downloaded = excluded.downloaded, \
                is_shared = excluded.is_shared",
            rusqlite::params![
                album.remote_id,
                album.album_name,
                album.size as i64,
                album.start_date.timestamp(),
                album.end_date.timestamp(),
                album.sync_date.timestamp(),
                album.downloaded,
                album.is_shared,
            ],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn clear_album_files(&self, album_remote_id: &str) -> Result<(), StateError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM album_files WHERE album_remote_id = ?1",
            [album_remote_id],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn put_album_file(
        &self,
        album_remote_id: &str,
        media_remote_id: &str,
        position: u32,
    ) -> Result<(), StateError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO album_files (album_remote_id, media_remote_id, position) \
             VALUES (?1, ?2, ?3)",
            rusqlite::params![album_remote_id, media_remote_id, position],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn put_album_downloaded(&self, album_remote_id: &str) -> Result<(), StateError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE albums SET downloaded = 1 WHERE remote_id = ?1",
            [album_remote_id],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn get_album_files(
        &self,
        invert: bool,
        download_again: bool,
    ) -> Result<Vec<AlbumFileEntry>, StateError> {
        let conn = self.conn()?;
        let direction = if invert { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT sf.relative_folder, sf.filename, a.album_name, a.start_date, a.end_date, \
                    a.remote_id, a.sync_date, af.position, sf.create_date, sf.modify_date \
             FROM album_files af \
             JOIN albums a ON af.album_remote_id = a.remote_id \
             JOIN sync_files sf ON af.media_remote_id = sf.remote_id \
             WHERE (?1 = 1 OR a.downloaded = 0) \
             ORDER BY a.album_name, a.remote_id, af.position {direction}"
        );
        let mut stmt = conn.prepare(&sql).map_err(StateError::query)?;
        let entries = stmt
            .query_map([download_again], |row| {
                Ok(AlbumFileEntry {
                    relative_folder: row.get(0)?,
                    filename: row.get(1)?,
                    album_name: row.get(2)?,
                    start_date: from_ts(row.get(3)?),
                    end_date: from_ts(row.get(4)?),
                    album_remote_id: row.get(5)?,
                    sync_date: from_ts(row.get(6)?),
                    position: row.get(7)?,
                    create_date: from_ts(row.get(8)?),
                    modify_date: from_ts(row.get(9)?),
                })
            })
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;
        Ok(entries)
    }

    async fn get_summary(&self) -> Result<StoreSummary, StateError> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<u64, StateError> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(StateError::query)
        };

        let total_media = count("SELECT COUNT(*) FROM sync_files")?;
        let downloaded = count("SELECT COUNT(*) FROM sync_files WHERE downloaded = 1")?;
        let albums = count("SELECT COUNT(*) FROM albums")?;
        let linked_albums = count("SELECT COUNT(*) FROM albums WHERE downloaded = 1")?;
        let album_files = count("SELECT COUNT(*) FROM album_files")?;
        let last_scan_date: Option<i64> = conn
            .query_row(
                "SELECT last_scan_date FROM globals WHERE id = 1",
                [],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()
            .map_err(StateError::query)?
            .flatten();

        Ok(StoreSummary {
            total_media,
            downloaded,
            albums,
            linked_albums,
            album_files,
            last_scan_date: last_scan_date.map(from_ts),
        })
    }
}

fn row_to_media_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaRecord> {
    Ok(MediaRecord {
        id: Some(row.get(0)?),
        remote_id: row.get(1)?,
        uid: row.get(2)?,
        url: row.get(3)?,
        relative_folder: row.get(4)?,
        filename: row.get(5)?,
        orig_filename: row.get(6)?,
        duplicate_number: row.get(7)?,
        size: row.get::<_, i64>(8)? as u64,
        mime_type: row.get(9)?,
        description: row.get(10)?,
        modify_date: from_ts(row.get(11)?),
        create_date: from_ts(row.get(12)?),
        sync_date: from_ts(row.get(13)?),
        downloaded: row.get(14)?,
        location: row.get(15)?,
    })
}

fn row_to_album_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlbumRecord> {
    Ok(AlbumRecord {
        remote_id: row.get(0)?,
        album_name: row.get(1)?,
        size: row.get::<_, i64>(2)? as u64,
        start_date: from_ts(row.get(3)?),
        end_date: from_ts(row.get(4)?),
        sync_date: from_ts(row.get(5)?),
        downloaded: row.get(6)?,
        is_shared: row.get(7)?,
    })
}
