//! gphotos-sync-rs: incremental mirror of a Google Photos library.
//!
//! Indexes the library and its albums into a local SQLite store, downloads
//! new items with a bounded pool of concurrent transfers, and rebuilds an
//! `albums/` tree of links into the downloaded files.

#![warn(clippy::all)]

mod cli;
mod config;
mod download;
mod fs_caps;
mod google;
mod index;
mod links;
mod reconcile;
pub mod retry;
mod shutdown;
mod state;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use fs4::fs_std::FileExt;
use tracing_subscriber::EnvFilter;

use cli::Command;
use download::quarantine::BadIds;
use state::{LocalStore, SqliteStore};

/// Take the exclusive lock on the sync root. Held until the returned file is
/// dropped.
async fn lock_root(root: &Path) -> anyhow::Result<std::fs::File> {
    let lock_path = config::lock_path(root);
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::create(&lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another gphotos-sync-rs instance is running on this folder (lock: {})",
                lock_path.display()
            )
        })?;
        Ok::<std::fs::File, anyhow::Error>(file)
    })
    .await?
}

/// Run the status command.
async fn run_status(args: cli::RootArgs) -> anyhow::Result<()> {
    let (root, db_path) = config::root_paths(&args);

    if !db_path.exists() {
        println!("No index found at {}", db_path.display());
        println!("Run a sync first to create it.");
        return Ok(());
    }

    let store = SqliteStore::open(&db_path).await?;
    let summary = store.get_summary().await?;
    let bad_ids = BadIds::load(&root)?;

    println!("Index: {}", db_path.display());
    println!();
    println!("Media:");
    println!("  Total:       {}", summary.total_media);
    println!("  Downloaded:  {}", summary.downloaded);
    println!("  Pending:     {}", summary.pending());
    println!("  Quarantined: {}", bad_ids.len());
    println!();
    println!("Albums:");
    println!("  Total:       {}", summary.albums);
    println!("  Linked:      {}", summary.linked_albums);
    println!("  Entries:     {}", summary.album_files);
    println!();

    match summary.last_scan_date {
        Some(date) => println!(
            "Scanned up to: {}",
            date.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("Scanned up to: never"),
    }

    Ok(())
}

/// Run the clear-quarantine command.
fn run_clear_quarantine(args: cli::RootArgs) -> anyhow::Result<()> {
    let (root, _) = config::root_paths(&args);
    if BadIds::clear(&root)? {
        println!("Quarantine cleared; failed items will be tried on the next sync.");
    } else {
        println!("No quarantine file under {}", root.display());
    }
    Ok(())
}

/// Run the reconcile command.
async fn run_reconcile(args: cli::ReconcileArgs) -> anyhow::Result<()> {
    let (root, db_path) = config::root_paths(&args.root);
    if !db_path.exists() {
        anyhow::bail!("No index found at {}", db_path.display());
    }

    let _lock = lock_root(&root).await?;
    let store = SqliteStore::open(&db_path).await?;
    let stats = reconcile::remove_untracked(&store, &root, &args.photos_path, args.dry_run).await?;

    let verb = if args.dry_run { "Would remove" } else { "Removed" };
    println!("Checked {} files. {} {}.", stats.checked, verb, stats.removed);
    Ok(())
}

/// Run a full sync: index, download, then rebuild album links.
async fn run_sync(args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = config::Config::from_cli(args)?;
    tracing::debug!(?config, "Resolved configuration");
    let started = Instant::now();

    tokio::fs::create_dir_all(&config.root)
        .await
        .with_context(|| format!("Failed to create root folder {}", config.root.display()))?;
    let _lock = lock_root(&config.root).await?;

    let caps = fs_caps::FilesystemCapabilities::probe(&config.root, config.ntfs)
        .with_context(|| format!("Failed to probe {}", config.root.display()))?;
    let store = SqliteStore::open(&config.db_path).await?;
    tracing::info!(
        root = %config.root.display(),
        db = %store.path().display(),
        threads = config.threads,
        "Starting gphotos-sync-rs"
    );

    let shutdown_token = shutdown::install_signal_handler()?;

    let needs_remote = !config.skip_index || !config.skip_files;
    let library = if needs_remote {
        let Some(token) = config.token.clone() else {
            anyhow::bail!("An access token is required: pass --token or set GPHOTOS_ACCESS_TOKEN");
        };
        let session = google::RestSession::new(
            token,
            usize::from(config.threads),
            config.retry_config(),
        )?;
        Some(google::PhotosLibrary::new(Arc::new(session)))
    } else {
        None
    };

    let index_settings = config.index_settings();
    let mut index_stats = index::IndexStats::default();
    let mut album_stats = index::albums::AlbumStats::default();
    if let (Some(library), false) = (&library, config.skip_index) {
        index_stats =
            index::index_library(library, &store, &caps, &index_settings, &shutdown_token).await?;
        if !config.skip_albums && !shutdown_token.is_cancelled() {
            album_stats = index::albums::index_albums(
                library,
                &store,
                &caps,
                &index_settings,
                &shutdown_token,
            )
            .await?;
        }
    }

    let mut download_stats = download::DownloadStats::default();
    if let (Some(library), false) = (&library, config.skip_files) {
        if !shutdown_token.is_cancelled() {
            download_stats = download::download_pending(
                library,
                &store,
                &config.download_settings(),
                &shutdown_token,
            )
            .await?;
        }
    }

    let mut link_stats = links::LinkStats::default();
    if !config.skip_albums && !shutdown_token.is_cancelled() {
        link_stats =
            links::create_album_links(&store, &caps, &config.link_settings(), &shutdown_token)
                .await?;
    }

    if shutdown_token.is_cancelled() {
        tracing::info!("Sync interrupted; the next run resumes from the index");
    }
    tracing::info!(
        indexed = index_stats.inserted,
        updated = index_stats.updated,
        unchanged = index_stats.unchanged,
        filtered = index_stats.skipped,
        albums = album_stats.indexed,
        downloaded = download_stats.downloaded,
        already_present = download_stats.skipped,
        failed = download_stats.failed,
        quarantined = download_stats.quarantined,
        links = link_stats.links,
        elapsed_secs = started.elapsed().as_secs(),
        "Sync finished"
    );

    if download_stats.failed > 0 {
        anyhow::bail!("{} downloads failed", download_stats.failed);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let filter = cli.log_level.as_filter();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match cli.effective_command() {
        Command::Sync(args) => run_sync(args).await,
        Command::Status(args) => run_status(args).await,
        Command::ClearQuarantine(args) => run_clear_quarantine(args),
        Command::Reconcile(args) => run_reconcile(args).await,
    }
}
