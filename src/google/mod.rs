//! Google Photos Library API client.
//!
//! [`PhotosLibrary`] knows the endpoint shapes and page sizes; the transport
//! (authentication, retries) lives behind [`PhotosSession`].

pub mod album;
pub mod error;
pub mod media;
pub mod session;

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

pub use album::GoogleAlbum;
pub use error::ApiError;
pub use media::GoogleMedia;
pub use session::{ByteStream, PhotosSession, RestSession};

use crate::types::{maximum_date, minimum_date};

pub const API_ROOT: &str = "https://photoslibrary.googleapis.com/v1";

const MEDIA_PAGE_SIZE: u32 = 100;
const ALBUM_PAGE_SIZE: u32 = 50;
/// Upper limit of ids accepted by `mediaItems:batchGet`.
pub const BATCH_SIZE: usize = 40;

/// One page of media items.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPage {
    #[serde(default)]
    pub media_items: Vec<Value>,
    pub next_page_token: Option<String>,
}

/// One page of albums (owned or shared).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumPage {
    #[serde(default, alias = "sharedAlbums")]
    pub albums: Vec<Value>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    media_item_results: Vec<BatchItemResult>,
}

/// Result for one id of a batch get. Exactly one of the fields is set.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub media_item: Option<Value>,
    pub status: Option<Value>,
}

/// Remote filter for a library scan.
#[derive(Debug, Clone, Default)]
pub struct MediaQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub include_video: bool,
    pub favourites_only: bool,
    pub include_archived: bool,
}

impl MediaQuery {
    /// True when the plain listing endpoint returns the same items as a search.
    pub fn is_unfiltered(&self) -> bool {
        self.start_date.is_none()
            && self.end_date.is_none()
            && self.include_video
            && !self.favourites_only
            && !self.include_archived
    }

    fn search_body(&self, page_token: Option<&str>) -> Value {
        let mut filters = serde_json::Map::new();
        if self.start_date.is_some() || self.end_date.is_some() {
            let start = self.start_date.unwrap_or_else(minimum_date);
            let end = self.end_date.unwrap_or_else(maximum_date);
            filters.insert(
                "dateFilter".into(),
                json!({ "ranges": [{ "startDate": api_date(start), "endDate": api_date(end) }] }),
            );
        }
        let media_type = if self.include_video { "ALL_MEDIA" } else { "PHOTO" };
        filters.insert("mediaTypeFilter".into(), json!({ "mediaTypes": [media_type] }));
        if self.favourites_only {
            filters.insert(
                "featureFilter".into(),
                json!({ "includedFeatures": ["FAVORITES"] }),
            );
        }
        if self.include_archived {
            filters.insert("includeArchivedMedia".into(), Value::Bool(true));
        }

        let mut body = json!({ "pageSize": MEDIA_PAGE_SIZE, "filters": filters });
        if let Some(token) = page_token {
            body["pageToken"] = Value::String(token.to_string());
        }
        body
    }
}

fn api_date(date: DateTime<Utc>) -> Value {
    json!({ "year": date.year(), "month": date.month(), "day": date.day() })
}

/// Typed facade over the Library API endpoints used by the sync.
#[derive(Clone)]
pub struct PhotosLibrary {
    session: Arc<dyn PhotosSession>,
    api_root: String,
}

impl PhotosLibrary {
    pub fn new(session: Arc<dyn PhotosSession>) -> Self {
        Self {
            session,
            api_root: API_ROOT.to_string(),
        }
    }

    pub fn session(&self) -> &Arc<dyn PhotosSession> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_root)
    }

    /// `GET mediaItems`: the whole library, newest first.
    pub async fn list_media(&self, page_token: Option<&str>) -> Result<MediaPage, ApiError> {
        let mut query = vec![("pageSize", MEDIA_PAGE_SIZE.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        let value = self.session.get(&self.url("mediaItems"), &query).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `POST mediaItems:search` with date, type and feature filters.
    pub async fn search_media(
        &self,
        query: &MediaQuery,
        page_token: Option<&str>,
    ) -> Result<MediaPage, ApiError> {
        let body = query.search_body(page_token);
        let value = self
            .session
            .post(&self.url("mediaItems:search"), &body)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `POST mediaItems:search` scoped to one album, in album order.
    pub async fn album_media(
        &self,
        album_id: &str,
        page_token: Option<&str>,
    ) -> Result<MediaPage, ApiError> {
        let mut body = json!({ "albumId": album_id, "pageSize": MEDIA_PAGE_SIZE });
        if let Some(token) = page_token {
            body["pageToken"] = Value::String(token.to_string());
        }
        let value = self
            .session
            .post(&self.url("mediaItems:search"), &body)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `GET albums` or `GET sharedAlbums`.
    pub async fn list_albums(
        &self,
        shared: bool,
        page_token: Option<&str>,
    ) -> Result<AlbumPage, ApiError> {
        let mut query = vec![("pageSize", ALBUM_PAGE_SIZE.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        let path = if shared { "sharedAlbums" } else { "albums" };
        let value = self.session.get(&self.url(path), &query).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `GET mediaItems:batchGet`. Results come back in request order.
    pub async fn batch_get(&self, ids: &[String]) -> Result<Vec<BatchItemResult>, ApiError> {
        let query: Vec<(&str, String)> = ids.iter().map(|id| ("mediaItemIds", id.clone())).collect();
        let value = self
            .session
            .get(&self.url("mediaItems:batchGet"), &query)
            .await?;
        let response: BatchGetResponse = serde_json::from_value(value)?;
        if response.media_item_results.len() != ids.len() {
            return Err(ApiError::Malformed(format!(
                "batchGet returned {} results for {} ids",
                response.media_item_results.len(),
                ids.len()
            )));
        }
        Ok(response.media_item_results)
    }

    /// `GET mediaItems/{id}`.
    pub async fn get_media(&self, id: &str) -> Result<Value, ApiError> {
        self.session
            .get(&self.url(&format!("mediaItems/{id}")), &[])
            .await
    }
}
