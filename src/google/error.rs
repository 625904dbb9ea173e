use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryAction;

/// Errors returned by the photos REST client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status} from {url}")]
    Status {
        status: u16,
        url: String,
        /// Delay requested by the server through `Retry-After`.
        retry_after: Option<Duration>,
    },

    #[error("Request to {url} failed: {source}")]
    Transport { url: String, source: reqwest::Error },

    #[error("Invalid JSON response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Rate limits, server errors and connection failures are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::Transport { .. } => true,
            ApiError::Json(_) | ApiError::Malformed(_) => false,
        }
    }

    /// Classifier for [`crate::retry::retry_with_backoff`].
    pub fn retry_action(&self) -> RetryAction {
        if !self.is_retryable() {
            return RetryAction::Abort;
        }
        match self {
            ApiError::Status {
                retry_after: Some(delay),
                ..
            } => RetryAction::RetryAfter(*delay),
            _ => RetryAction::Retry,
        }
    }
}
