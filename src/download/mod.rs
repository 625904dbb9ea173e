//! Download engine: turns indexed but not yet downloaded rows into files.
//!
//! Pending rows stream out of the store and are grouped into batches; one
//! batch get per batch resolves fresh download URLs, which expire quickly and
//! are never cached. Transfers run on a bounded `JoinSet`. Workers only touch
//! the filesystem; every store write happens here on the driving task.

pub mod error;
pub mod file;
pub mod quarantine;

use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use futures_util::TryStreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::fs_caps::FilesystemCapabilities;
use crate::google::{GoogleMedia, PhotosLibrary, BATCH_SIZE};
use crate::retry::RetryConfig;
use crate::state::{LocalStore, MediaRecord, SearchFilter};
use error::DownloadError;
use quarantine::{BadIds, BadItem};

/// Subset of application config consumed by the download engine.
/// Decoupled from CLI parsing so the engine can be tested independently.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Sync root; row paths are relative to it.
    pub(crate) root: PathBuf,
    /// Maximum concurrent transfers.
    pub(crate) threads: usize,
    /// Also consider rows already flagged downloaded, fetching any whose file
    /// has gone missing.
    pub(crate) retry_download: bool,
    pub(crate) retry: RetryConfig,
    pub(crate) no_progress_bar: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadStats {
    pub downloaded: u64,
    /// Already present on disk.
    pub skipped: u64,
    pub failed: u64,
    /// Newly quarantined this run.
    pub quarantined: u64,
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .expect("valid template")
        .progress_chars("=> "),
    );
    pb
}

type TaskOutcome = Result<(tokio::task::Id, Result<u64, DownloadError>), JoinError>;

/// State of one download pass.
struct Downloader<'a> {
    library: &'a PhotosLibrary,
    store: &'a dyn LocalStore,
    settings: &'a DownloadSettings,
    shutdown_token: &'a CancellationToken,
    bad_ids: BadIds,
    in_flight: JoinSet<Result<u64, DownloadError>>,
    /// Row behind each in-flight task.
    tasks: HashMap<tokio::task::Id, MediaRecord>,
    stats: DownloadStats,
    pb: ProgressBar,
}

/// Download every pending row, isolating failures per item.
///
/// Items already present on disk are flagged downloaded without a transfer.
/// Items the remote side refuses are added to the quarantine file and skipped
/// on later runs. On cancellation no new transfers start; running ones stop
/// and clean up before this returns.
pub async fn download_pending(
    library: &PhotosLibrary,
    store: &dyn LocalStore,
    settings: &DownloadSettings,
    shutdown_token: &CancellationToken,
) -> Result<DownloadStats> {
    let started = Instant::now();
    let summary = store.get_summary().await?;
    let total = if settings.retry_download {
        summary.total_media
    } else {
        summary.pending()
    };

    let mut downloader = Downloader {
        library,
        store,
        settings,
        shutdown_token,
        bad_ids: BadIds::load(&settings.root)?,
        in_flight: JoinSet::new(),
        tasks: HashMap::new(),
        stats: DownloadStats::default(),
        pb: create_progress_bar(settings.no_progress_bar, total),
    };

    let result = downloader.run().await;
    // Settle whatever is still running, even when the pass failed.
    downloader.drain().await?;
    downloader.bad_ids.store()?;
    downloader.pb.finish_and_clear();
    result?;

    let stats = downloader.stats;
    tracing::info!(
        downloaded = stats.downloaded,
        skipped = stats.skipped,
        failed = stats.failed,
        quarantined = stats.quarantined,
        elapsed_secs = started.elapsed().as_secs(),
        "Download pass finished"
    );
    Ok(stats)
}

impl Downloader<'_> {
    async fn run(&mut self) -> Result<()> {
        let store = self.store;
        let mut rows = store.get_rows_by_search(SearchFilter {
            skip_downloaded: !self.settings.retry_download,
            ..Default::default()
        });

        let mut batch: Vec<MediaRecord> = Vec::with_capacity(BATCH_SIZE);
        while let Some(row) = rows.try_next().await? {
            if self.shutdown_token.is_cancelled() {
                self.pb
                    .suspend(|| tracing::info!("Shutdown requested, stopping new downloads"));
                return Ok(());
            }
            if self.bad_ids.contains(&row.remote_id) {
                self.pb.inc(1);
                continue;
            }
            let local = self.settings.root.join(row.relative_path());
            if local.exists() {
                if !row.downloaded {
                    self.store.put_downloaded(&row.remote_id).await?;
                }
                self.stats.skipped += 1;
                self.pb.inc(1);
                continue;
            }
            batch.push(row);
            if batch.len() >= BATCH_SIZE {
                self.download_batch(std::mem::take(&mut batch)).await?;
            }
        }
        if !batch.is_empty() {
            self.download_batch(batch).await?;
        }
        Ok(())
    }

    /// Resolve download URLs for one batch and submit the transfers. If the
    /// batch call fails, each item is fetched on its own so one bad item
    /// cannot sink the rest.
    async fn download_batch(&mut self, batch: Vec<MediaRecord>) -> Result<()> {
        let ids: Vec<String> = batch.iter().map(|r| r.remote_id.clone()).collect();
        match self.library.batch_get(&ids).await {
            Ok(results) => {
                for (row, result) in batch.into_iter().zip(results) {
                    match result.media_item {
                        Some(json) => self.submit(row, json).await?,
                        None => {
                            let reason = match result.status {
                                Some(status) => status.to_string(),
                                None => "no media item returned".to_string(),
                            };
                            self.quarantine(&row, reason);
                        }
                    }
                }
            }
            Err(e) => {
                self.pb.suspend(|| {
                    tracing::warn!(
                        error = %e,
                        count = batch.len(),
                        "Batch get failed, fetching items individually"
                    )
                });
                for row in batch {
                    if self.shutdown_token.is_cancelled() {
                        break;
                    }
                    match self.library.get_media(&row.remote_id).await {
                        Ok(json) => self.submit(row, json).await?,
                        Err(e) => self.quarantine(&row, e.to_string()),
                    }
                }
            }
        }
        Ok(())
    }

    /// Start one transfer, first making room in the pool if it is full.
    async fn submit(&mut self, row: MediaRecord, json: Value) -> Result<()> {
        // Reap whatever has already finished without waiting.
        while let Some(outcome) = self.in_flight.try_join_next_with_id() {
            self.complete(outcome).await?;
        }
        while self.in_flight.len() >= self.settings.threads.max(1) {
            match self.in_flight.join_next_with_id().await {
                Some(outcome) => self.complete(outcome).await?,
                None => break,
            }
        }
        if self.shutdown_token.is_cancelled() {
            return Ok(());
        }

        let url = GoogleMedia::new(json, &FilesystemCapabilities::default()).download_url();
        let path = self.settings.root.join(row.relative_path());
        let session = Arc::clone(self.library.session());
        let retry = self.settings.retry;
        let token = self.shutdown_token.clone();
        let (modified, created) = (row.modify_date, row.create_date);
        tracing::debug!(path = %path.display(), "Downloading");

        let handle = self.in_flight.spawn(async move {
            let bytes = file::download_file(session.as_ref(), &url, &path, &retry, &token).await?;
            if let Err(e) = file::set_file_times(&path, modified, created) {
                tracing::warn!("Could not set times on {}: {}", path.display(), e);
            }
            Ok(bytes)
        });
        self.tasks.insert(handle.id(), row);
        Ok(())
    }

    /// Record the outcome of one finished transfer.
    async fn complete(&mut self, outcome: TaskOutcome) -> Result<()> {
        let (id, result) = match outcome {
            Ok((id, result)) => (id, result),
            Err(join_err) => {
                let id = join_err.id();
                (
                    id,
                    Err(DownloadError::Other(anyhow::anyhow!(
                        "download task failed: {join_err}"
                    ))),
                )
            }
        };
        let Some(row) = self.tasks.remove(&id) else {
            return Ok(());
        };
        self.pb.set_message(row.filename.clone());
        self.pb.inc(1);

        match result {
            Ok(bytes) => {
                self.store.put_downloaded(&row.remote_id).await?;
                self.stats.downloaded += 1;
                tracing::debug!(
                    path = %row.relative_path().display(),
                    size_bytes = bytes,
                    "Downloaded"
                );
            }
            Err(DownloadError::Cancelled(_)) => {}
            Err(e) => {
                self.stats.failed += 1;
                self.pb.suspend(|| {
                    tracing::error!(
                        "Download failed: {}: {}",
                        row.relative_path().display(),
                        e
                    )
                });
                if e.is_remote() {
                    self.quarantine(&row, e.to_string());
                }
            }
        }
        Ok(())
    }

    fn quarantine(&mut self, row: &MediaRecord, error: String) {
        let item = BadItem {
            path: row.relative_path().to_string_lossy().into_owned(),
            product_url: row.url.clone(),
            error,
        };
        let added = self.pb.suspend(|| self.bad_ids.add(&row.remote_id, item));
        if added {
            self.stats.quarantined += 1;
        }
    }

    /// Wait for every in-flight transfer.
    async fn drain(&mut self) -> Result<()> {
        while let Some(outcome) = self.in_flight.join_next_with_id().await {
            self.complete(outcome).await?;
        }
        Ok(())
    }
}
