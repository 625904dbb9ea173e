//! Row types for the local store.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// One indexed remote media item (a `sync_files` row).
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRecord {
    /// SQLite row id; `None` until the record has been stored.
    pub id: Option<i64>,
    pub remote_id: String,
    /// Secondary identity taken from local file metadata, when known.
    pub uid: Option<String>,
    pub url: String,
    /// Folder under the sync root, e.g. `photos/2017/09`.
    pub relative_folder: String,
    /// Local, duplicate-resolved file name.
    pub filename: String,
    /// Remote title with any `(n)` suffix stripped.
    pub orig_filename: String,
    /// 0 for the first item seen with this folder and name, n for the nth duplicate.
    pub duplicate_number: u32,
    pub size: u64,
    pub mime_type: String,
    pub description: String,
    pub modify_date: DateTime<Utc>,
    pub create_date: DateTime<Utc>,
    pub sync_date: DateTime<Utc>,
    pub downloaded: bool,
    pub location: Option<String>,
}

impl MediaRecord {
    /// Path of the media file relative to the sync root.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.relative_folder).join(&self.filename)
    }

    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video")
    }
}

/// One indexed album (an `albums` row).
#[derive(Debug, Clone, PartialEq)]
pub struct AlbumRecord {
    pub remote_id: String,
    pub album_name: String,
    /// Item count declared by the remote service.
    pub size: u64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub sync_date: DateTime<Utc>,
    /// Whether the album's link folder has been materialized.
    pub downloaded: bool,
    pub is_shared: bool,
}

/// A joined album membership row, as consumed by the album linker.
#[derive(Debug, Clone, PartialEq)]
pub struct AlbumFileEntry {
    pub relative_folder: String,
    pub filename: String,
    pub album_name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub album_remote_id: String,
    pub sync_date: DateTime<Utc>,
    pub position: u32,
    pub create_date: DateTime<Utc>,
    pub modify_date: DateTime<Utc>,
}

/// Filter for [`super::LocalStore::get_rows_by_search`].
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// SQL `LIKE` pattern matched against `remote_id`; `None` matches everything.
    pub remote_id_pattern: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub skip_downloaded: bool,
}

/// Counts reported by the `status` command.
#[derive(Debug, Clone, Default)]
pub struct StoreSummary {
    pub total_media: u64,
    pub downloaded: u64,
    pub albums: u64,
    /// Albums whose link folder was built by a sync.
    pub linked_albums: u64,
    pub album_files: u64,
    pub last_scan_date: Option<DateTime<Utc>>,
}

impl StoreSummary {
    pub fn pending(&self) -> u64 {
        self.total_media.saturating_sub(self.downloaded)
    }
}
