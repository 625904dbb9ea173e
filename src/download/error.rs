use thiserror::Error;

use crate::google::ApiError;

/// Typed download errors enabling retry classification.
///
/// The request itself is already retried by the transport, so a failed
/// request is final. A body that breaks off mid-stream may be retried from
/// scratch when the underlying failure is transient.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Request for {path} failed: {source}")]
    Api { source: ApiError, path: String },

    #[error("Transfer of {path} broke off after {bytes_written} bytes: {source}")]
    Stream {
        source: ApiError,
        path: String,
        bytes_written: u64,
    },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("Download of {0} cancelled")]
    Cancelled(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DownloadError {
    /// Whether a fresh attempt at the whole transfer is worthwhile.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Stream { source, .. } => source.is_retryable(),
            DownloadError::Api { .. }
            | DownloadError::Disk(_)
            | DownloadError::Cancelled(_)
            | DownloadError::Other(_) => false,
        }
    }

    /// Remote failures are permanent for this item and get quarantined;
    /// local ones are retried on the next run.
    pub fn is_remote(&self) -> bool {
        matches!(self, DownloadError::Api { .. } | DownloadError::Stream { .. })
    }
}
