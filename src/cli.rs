use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "gphotos-sync-rs",
    version,
    about = "Incrementally mirror a Google Photos library and its albums",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Arguments for the default `sync` command
    #[command(flatten)]
    pub sync: SyncArgs,

    /// Log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Index the library and albums, download new items and rebuild album links
    Sync(SyncArgs),
    /// Show what the local index holds
    Status(RootArgs),
    /// Delete the quarantine file so failed items are tried again
    ClearQuarantine(RootArgs),
    /// Delete local media files that are not in the index
    Reconcile(ReconcileArgs),
}

impl Cli {
    /// The command to run; `sync` when none was given.
    pub fn effective_command(self) -> Command {
        self.command.unwrap_or(Command::Sync(self.sync))
    }
}

#[derive(Args, Debug, Clone)]
pub struct RootArgs {
    /// Root folder of the local mirror
    pub root_folder: String,

    /// Index database location (default: <ROOT_FOLDER>/gphotos.sqlite)
    #[arg(long)]
    pub db_path: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub root: RootArgs,

    /// Folder under the root for media files
    #[arg(long, default_value = "photos")]
    pub photos_path: String,

    /// Only report what would be deleted
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Root folder of the local mirror
    pub root_folder: Option<String>,

    /// Index database location (default: <ROOT_FOLDER>/gphotos.sqlite)
    #[arg(long)]
    pub db_path: Option<String>,

    /// OAuth access token for the Photos Library API.
    /// Prefer the GPHOTOS_ACCESS_TOKEN environment variable, since
    /// command line arguments are visible in process listings.
    #[arg(long, env = "GPHOTOS_ACCESS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Only index items created on or after this date or interval (e.g., 2017-01-02 or 20d)
    #[arg(long)]
    pub start_date: Option<String>,

    /// Only index items created on or before this date or interval
    #[arg(long)]
    pub end_date: Option<String>,

    /// Only index and link the album with this title
    #[arg(long)]
    pub album: Option<String>,

    /// Only index items marked as favourite
    #[arg(long)]
    pub favourites_only: bool,

    /// Leave videos out of the index
    #[arg(long)]
    pub skip_video: bool,

    /// Include archived items in the index
    #[arg(long)]
    pub include_archived: bool,

    /// Maximum concurrent downloads
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u16).range(1..))]
    pub threads: u16,

    /// Retries for failed requests
    #[arg(long, default_value_t = 5)]
    pub max_retries: u32,

    /// Base delay in seconds between retries
    #[arg(long, default_value_t = 1)]
    pub retry_delay: u64,

    /// Folder under the root for media files
    #[arg(long, default_value = "photos")]
    pub photos_path: String,

    /// Use <year>-<month> folders instead of <year>/<month>
    #[arg(long)]
    pub flat_path: bool,

    /// Hardlink album entries instead of symlinking them
    #[arg(long)]
    pub use_hardlinks: bool,

    /// Ignore the scan checkpoint and index the whole library
    #[arg(long)]
    pub rescan: bool,

    /// Re-check every indexed item and download any file that is missing
    #[arg(long)]
    pub retry_download: bool,

    /// Re-index every album even when its item count is unchanged
    #[arg(long)]
    pub flush_index: bool,

    /// Leave albums shared with you out of the index
    #[arg(long)]
    pub skip_shared_albums: bool,

    /// Do not index albums or build album links
    #[arg(long)]
    pub skip_albums: bool,

    /// Do not index; work from the existing index only
    #[arg(long)]
    pub skip_index: bool,

    /// Do not download files
    #[arg(long)]
    pub skip_files: bool,

    /// Name album folders after the first item's date instead of the last
    #[arg(long)]
    pub album_date_by_first_photo: bool,

    /// Name album folders without a date
    #[arg(long)]
    pub omit_album_date: bool,

    /// Number album links in reverse album order
    #[arg(long)]
    pub album_invert: bool,

    /// Apply NTFS file name rules regardless of platform
    #[arg(long)]
    pub ntfs: bool,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}
