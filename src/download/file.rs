use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use filetime::FileTime;
use futures_util::StreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::error::DownloadError;
use crate::google::PhotosSession;
use crate::retry::{self, RetryAction, RetryConfig};

/// Prefix of in-progress downloads; never a valid media name.
pub(crate) const PART_PREFIX: &str = ".gphotos-";
pub(crate) const PART_SUFFIX: &str = ".part";

/// Unique temp path beside the destination, so the final rename stays on one
/// filesystem.
fn temp_download_path(download_path: &Path) -> PathBuf {
    let dir = download_path.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(
        "{PART_PREFIX}{}{PART_SUFFIX}",
        uuid::Uuid::new_v4().simple()
    ))
}

/// Download `url` to `download_path` through a temp file.
///
/// The body is written to a `.part` file and renamed into place once
/// complete, so a partial file never appears under the final name. The temp
/// file is removed on every failure, cancellation included. Returns the
/// number of bytes written.
pub async fn download_file(
    session: &dyn PhotosSession,
    url: &str,
    download_path: &Path,
    retry_config: &RetryConfig,
    shutdown_token: &CancellationToken,
) -> Result<u64, DownloadError> {
    if let Some(parent) = download_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    retry::retry_with_backoff(
        retry_config,
        |e: &DownloadError| {
            if e.is_retryable() {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || async {
            let part_path = temp_download_path(download_path);
            let result =
                attempt_download(session, url, download_path, &part_path, shutdown_token).await;
            if result.is_err() {
                let _ = fs::remove_file(&part_path).await;
            }
            result
        },
    )
    .await
}

async fn attempt_download(
    session: &dyn PhotosSession,
    url: &str,
    download_path: &Path,
    part_path: &Path,
    shutdown_token: &CancellationToken,
) -> Result<u64, DownloadError> {
    let path_str = download_path.display().to_string();
    let mut stream = session
        .download(url)
        .await
        .map_err(|source| DownloadError::Api {
            source,
            path: path_str.clone(),
        })?;

    let mut file = File::create(part_path).await?;
    let mut bytes_written: u64 = 0;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = shutdown_token.cancelled() => {
                return Err(DownloadError::Cancelled(path_str));
            }
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(|source| DownloadError::Stream {
            source,
            path: path_str.clone(),
            bytes_written,
        })?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    fs::rename(part_path, download_path).await?;
    Ok(bytes_written)
}

/// Stamp a downloaded file with the item's dates. Dates before the Unix
/// epoch are clamped to it since not every platform can store them.
pub fn set_file_times(
    path: &Path,
    modified: DateTime<Utc>,
    created: DateTime<Utc>,
) -> std::io::Result<()> {
    let atime = FileTime::from_unix_time(modified.timestamp().max(0), 0);
    let mtime = FileTime::from_unix_time(created.timestamp().max(0), 0);
    filetime::set_file_times(path, atime, mtime)
}
