use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use serde_json::Value;

use super::error::ApiError;
use crate::retry::{retry_with_backoff, RetryConfig};

/// Body of a media download, chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, ApiError>>;

/// Authenticated JSON-over-HTTPS transport used by [`super::PhotosLibrary`].
///
/// Implementations retry transient failures themselves; an error returned
/// from here is final for that request.
#[async_trait::async_trait]
pub trait PhotosSession: Send + Sync {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Value, ApiError>;

    async fn post(&self, url: &str, body: &Value) -> Result<Value, ApiError>;

    /// Start streaming the body at `url`. Only the request itself is retried.
    async fn download(&self, url: &str) -> Result<ByteStream, ApiError>;
}

/// `reqwest`-backed session authenticated with an OAuth bearer token.
pub struct RestSession {
    client: reqwest::Client,
    token: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for RestSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestSession")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RestSession {
    /// Build a session whose connection pool matches the download concurrency.
    pub fn new(token: String, pool_size: usize, retry: RetryConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gphotos-sync-rs/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(pool_size.max(1))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| ApiError::Transport {
                url: String::new(),
                source,
            })?;
        Ok(Self {
            client,
            token,
            retry,
        })
    }
}

fn transport(url: &str) -> impl Fn(reqwest::Error) -> ApiError + '_ {
    move |source| ApiError::Transport {
        url: url.to_string(),
        source,
    }
}

/// Turn a non-success response into [`ApiError::Status`], keeping any
/// `Retry-After` delay (in seconds) for the retry loop.
fn check_status(url: &str, resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    Err(ApiError::Status {
        status: status.as_u16(),
        url: url.to_string(),
        retry_after,
    })
}

async fn read_json(url: &str, resp: reqwest::Response) -> Result<Value, ApiError> {
    let resp = check_status(url, resp)?;
    let body = resp.bytes().await.map_err(transport(url))?;
    if body.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    Ok(serde_json::from_slice(&body)?)
}

#[async_trait::async_trait]
impl PhotosSession for RestSession {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        retry_with_backoff(&self.retry, ApiError::retry_action, || async {
            let resp = self
                .client
                .get(url)
                .bearer_auth(&self.token)
                .query(query)
                .send()
                .await
                .map_err(transport(url))?;
            read_json(url, resp).await
        })
        .await
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, ApiError> {
        retry_with_backoff(&self.retry, ApiError::retry_action, || async {
            let resp = self
                .client
                .post(url)
                .bearer_auth(&self.token)
                .json(body)
                .send()
                .await
                .map_err(transport(url))?;
            read_json(url, resp).await
        })
        .await
    }

    async fn download(&self, url: &str) -> Result<ByteStream, ApiError> {
        // Media base URLs are pre-signed; no bearer token needed.
        let resp = retry_with_backoff(&self.retry, ApiError::retry_action, || async {
            let resp = self.client.get(url).send().await.map_err(transport(url))?;
            check_status(url, resp)
        })
        .await?;
        let owned_url = url.to_string();
        Ok(resp
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|source| ApiError::Transport {
                    url: owned_url.clone(),
                    source,
                })
            })
            .boxed())
    }
}
