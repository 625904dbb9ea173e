use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};

use crate::cli::{RootArgs, SyncArgs};
use crate::download::DownloadSettings;
use crate::google::MediaQuery;
use crate::index::IndexSettings;
use crate::links::LinkSettings;
use crate::retry::RetryConfig;

pub const DB_FILE: &str = "gphotos.sqlite";
pub const LOCK_FILE: &str = "gphotos.lock";

/// Application configuration for a sync run.
pub struct Config {
    pub root: PathBuf,
    pub db_path: PathBuf,
    pub token: Option<String>,
    pub photos_folder: String,
    pub album: Option<String>,

    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,

    pub retry_delay_secs: u64,
    pub max_retries: u32,
    pub threads: u16,

    pub favourites_only: bool,
    pub skip_video: bool,
    pub include_archived: bool,
    pub flat_path: bool,
    pub use_hardlinks: bool,
    pub rescan: bool,
    pub retry_download: bool,
    pub flush_index: bool,
    pub skip_shared_albums: bool,
    pub skip_albums: bool,
    pub skip_index: bool,
    pub skip_files: bool,
    pub album_date_by_first_photo: bool,
    pub omit_album_date: bool,
    pub album_invert: bool,
    pub ntfs: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("root", &self.root)
            .field("db_path", &self.db_path)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("album", &self.album)
            .field("start_date", &self.start_date)
            .field("end_date", &self.end_date)
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Root folder and database path shared by every command.
pub fn resolve_paths(root_folder: &str, db_path: Option<&str>) -> (PathBuf, PathBuf) {
    let root = expand_tilde(root_folder);
    let db_path = db_path
        .map(expand_tilde)
        .unwrap_or_else(|| root.join(DB_FILE));
    (root, db_path)
}

pub fn root_paths(args: &RootArgs) -> (PathBuf, PathBuf) {
    resolve_paths(&args.root_folder, args.db_path.as_deref())
}

impl Config {
    pub fn from_cli(cli: SyncArgs) -> anyhow::Result<Self> {
        let Some(root_folder) = cli.root_folder.as_deref() else {
            anyhow::bail!("ROOT_FOLDER is required for sync");
        };
        let (root, db_path) = resolve_paths(root_folder, cli.db_path.as_deref());

        let start_date = cli
            .start_date
            .as_deref()
            .map(parse_date_or_interval)
            .transpose()?
            .map(|d| d.with_timezone(&Utc));
        let end_date = cli
            .end_date
            .as_deref()
            .map(parse_end_date)
            .transpose()?
            .map(|d| d.with_timezone(&Utc));
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                anyhow::bail!("--start-date is after --end-date");
            }
        }

        Ok(Self {
            root,
            db_path,
            token: cli.token,
            photos_folder: cli.photos_path,
            album: cli.album,
            start_date,
            end_date,
            retry_delay_secs: cli.retry_delay,
            max_retries: cli.max_retries,
            threads: cli.threads,
            favourites_only: cli.favourites_only,
            skip_video: cli.skip_video,
            include_archived: cli.include_archived,
            flat_path: cli.flat_path,
            use_hardlinks: cli.use_hardlinks,
            rescan: cli.rescan,
            retry_download: cli.retry_download,
            flush_index: cli.flush_index,
            skip_shared_albums: cli.skip_shared_albums,
            skip_albums: cli.skip_albums,
            skip_index: cli.skip_index,
            skip_files: cli.skip_files,
            album_date_by_first_photo: cli.album_date_by_first_photo,
            omit_album_date: cli.omit_album_date,
            album_invert: cli.album_invert,
            ntfs: cli.ntfs,
            no_progress_bar: cli.no_progress_bar,
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay_secs: self.retry_delay_secs,
            max_delay_secs: 60,
        }
    }

    pub fn index_settings(&self) -> IndexSettings {
        IndexSettings {
            photos_folder: self.photos_folder.clone(),
            query: MediaQuery {
                start_date: self.start_date,
                end_date: self.end_date,
                include_video: !self.skip_video,
                favourites_only: self.favourites_only,
                include_archived: self.include_archived,
            },
            rescan: self.rescan,
            flat_path: self.flat_path,
            album: self.album.clone(),
            skip_shared_albums: self.skip_shared_albums,
            flush_albums: self.flush_index,
        }
    }

    pub fn download_settings(&self) -> DownloadSettings {
        DownloadSettings {
            root: self.root.clone(),
            threads: usize::from(self.threads),
            retry_download: self.retry_download,
            retry: self.retry_config(),
            no_progress_bar: self.no_progress_bar,
        }
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            root: self.root.clone(),
            use_hardlinks: self.use_hardlinks,
            use_start_date: self.album_date_by_first_photo,
            flat_path: self.flat_path,
            omit_album_date: self.omit_album_date,
            album_invert: self.album_invert,
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        lock_path(&self.root)
    }
}

pub fn lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

/// Parse a human-friendly date or interval into a concrete timestamp.
///
/// Supports three formats:
/// - Relative interval: `"20d"` (20 days ago from now)
/// - ISO date: `"2025-01-02"` (midnight local time)
/// - ISO datetime: `"2025-01-02T14:30:00"` (local time)
pub(crate) fn parse_date_or_interval(s: &str) -> anyhow::Result<DateTime<Local>> {
    if let Some(days_str) = s.strip_suffix('d') {
        if let Ok(days) = days_str.parse::<i64>() {
            return Ok(Local::now() - chrono::Duration::days(days));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive_dt) = date.and_hms_opt(0, 0, 0) {
            if let Some(dt) = naive_dt.and_local_timezone(Local).single() {
                return Ok(dt);
            }
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        if let Some(local) = dt.and_local_timezone(Local).single() {
            return Ok(local);
        }
    }
    anyhow::bail!(
        "Cannot parse '{}' as a date. Expected ISO date (2017-01-02), \
         datetime (2017-01-02T14:30:00), or interval (20d)",
        s
    )
}

/// Like [`parse_date_or_interval`], but a plain date covers the whole day:
/// `"2025-01-02"` ends at 23:59:59 local time.
pub(crate) fn parse_end_date(s: &str) -> anyhow::Result<DateTime<Local>> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = date
            .and_hms_opt(23, 59, 59)
            .and_then(|naive_dt| naive_dt.and_local_timezone(Local).single())
        {
            return Ok(dt);
        }
    }
    parse_date_or_interval(s)
}
