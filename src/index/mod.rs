//! Incremental indexer: pages through remote listings and merges them into
//! the local store.
//!
//! The library scan runs first, then album listings (see [`albums`]). Both
//! are sequential; only downloading is concurrent.

pub mod albums;
pub mod resolver;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::fs_caps::FilesystemCapabilities;
use crate::google::{GoogleMedia, MediaQuery, PhotosLibrary};
use crate::state::LocalStore;
use resolver::Resolution;

/// Subset of application config consumed by the indexer.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Folder under the sync root holding media, e.g. `photos`.
    pub(crate) photos_folder: String,
    /// Filters given on the command line.
    pub(crate) query: MediaQuery,
    /// Ignore the checkpoint and scan the whole library.
    pub(crate) rescan: bool,
    pub(crate) flat_path: bool,
    /// Only index the album with this title.
    pub(crate) album: Option<String>,
    pub(crate) skip_shared_albums: bool,
    /// Re-index albums even when their item count is unchanged.
    pub(crate) flush_albums: bool,
}

impl IndexSettings {
    /// A scan narrowed by the user must not move the checkpoint, or the next
    /// incremental run would skip everything the filter left out.
    fn advances_checkpoint(&self) -> bool {
        self.query.start_date.is_none()
            && self.query.end_date.is_none()
            && self.query.include_video
            && !self.query.favourites_only
            && self.album.is_none()
    }

    fn in_requested_window(&self, date: DateTime<Utc>) -> bool {
        self.query.start_date.map_or(true, |s| date >= s)
            && self.query.end_date.map_or(true, |e| date <= e)
    }
}

/// Counters for one library scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub seen: u64,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Filtered out locally (videos, outside the requested dates).
    pub skipped: u64,
}

/// Scan the library and merge every item into the store.
///
/// The lower bound is the explicit start date, else the stored checkpoint,
/// unless `rescan` is set. After a complete scan that no user filter
/// narrowed, the latest creation date seen becomes the new checkpoint.
pub async fn index_library(
    library: &PhotosLibrary,
    store: &dyn LocalStore,
    caps: &FilesystemCapabilities,
    settings: &IndexSettings,
    shutdown_token: &CancellationToken,
) -> Result<IndexStats> {
    let mut stats = IndexStats::default();
    if settings.album.is_some() {
        tracing::info!("Album scoped run, skipping library scan");
        return Ok(stats);
    }

    let start_date = if settings.rescan {
        None
    } else {
        match settings.query.start_date {
            Some(start) => Some(start),
            None => store.get_scan_date().await?,
        }
    };
    let query = MediaQuery {
        start_date,
        ..settings.query.clone()
    };
    let use_search = !query.is_unfiltered();
    tracing::info!(
        start = ?query.start_date,
        end = ?query.end_date,
        search = use_search,
        "Indexing library"
    );

    let mut latest: Option<DateTime<Utc>> = None;
    let mut page_token: Option<String> = None;
    let mut completed = true;
    loop {
        if shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested, stopping library scan");
            completed = false;
            break;
        }
        let page = if use_search {
            library.search_media(&query, page_token.as_deref()).await
        } else {
            library.list_media(page_token.as_deref()).await
        }
        .context("Failed to list media items")?;

        for json in page.media_items {
            stats.seen += 1;
            let mut media = GoogleMedia::new(json, caps);
            if !settings.query.include_video && media.is_video() {
                stats.skipped += 1;
                continue;
            }
            let created = media.create_date();
            if !settings.in_requested_window(created) {
                stats.skipped += 1;
                continue;
            }
            media.set_path_by_date(&settings.photos_folder, settings.flat_path);
            match resolver::resolve_and_store(store, &mut media).await? {
                Resolution::Inserted(_) => stats.inserted += 1,
                Resolution::Updated(_) => stats.updated += 1,
                Resolution::Unchanged => stats.unchanged += 1,
            }
            latest = latest.max(Some(created));
        }

        // A page may be empty while more pages follow.
        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    tracing::info!(
        seen = stats.seen,
        inserted = stats.inserted,
        updated = stats.updated,
        skipped = stats.skipped,
        "Library scan finished"
    );

    if completed && settings.advances_checkpoint() {
        if let Some(latest) = latest {
            let previous = store.get_scan_date().await?;
            if previous.map_or(true, |p| latest > p) {
                store.set_scan_date(latest).await?;
                tracing::debug!(checkpoint = %latest, "Advanced scan checkpoint");
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::session::testing::{media_item, FakeSession};
    use crate::state::SqliteStore;
    use crate::types::date_utc;
    use serde_json::Value;
    use std::sync::Arc;

    pub(crate) fn settings() -> IndexSettings {
        IndexSettings {
            photos_folder: "photos".into(),
            query: MediaQuery {
                include_video: true,
                ..Default::default()
            },
            rescan: false,
            flat_path: false,
            album: None,
            skip_shared_albums: false,
            flush_albums: false,
        }
    }

    fn caps() -> FilesystemCapabilities {
        FilesystemCapabilities {
            windows_names: false,
            ..Default::default()
        }
    }

    /// 10 items in 2016, 10 in 2017 and one in 2018.
    fn library_items() -> Vec<Value> {
        let mut items = Vec::new();
        for i in 0..10 {
            items.push(media_item(
                &format!("old{i}"),
                &format!("old{i}.jpg"),
                &format!("2016-06-{:02}T12:00:00Z", i + 1),
                "image/jpeg",
            ));
        }
        for i in 0..10 {
            items.push(media_item(
                &format!("new{i}"),
                &format!("new{i}.jpg"),
                &format!("2017-0{}-01T12:00:00Z", i.min(8) + 1),
                "image/jpeg",
            ));
        }
        items.push(media_item(
            "latest",
            "latest.jpg",
            "2018-03-04T05:06:07Z",
            "image/jpeg",
        ));
        items
    }

    async fn run(
        fake: FakeSession,
        store: &SqliteStore,
        settings: &IndexSettings,
    ) -> (IndexStats, Arc<FakeSession>) {
        let fake = Arc::new(fake);
        let library = PhotosLibrary::new(fake.clone());
        let stats = index_library(
            &library,
            store,
            &caps(),
            settings,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        (stats, fake)
    }

    #[tokio::test]
    async fn test_checkpoint_only_after_unfiltered_scan() {
        let store = SqliteStore::open_in_memory().unwrap();

        let mut filtered = settings();
        filtered.query.end_date = date_utc(2017, 1, 1);
        let (stats, fake) = run(
            FakeSession::with_media(library_items()),
            &store,
            &filtered,
        )
        .await;
        assert_eq!(stats.inserted, 10);
        assert_eq!(fake.count_calls("POST mediaItems:search"), 1);
        assert!(store.get_scan_date().await.unwrap().is_none());

        let (stats, fake) = run(
            FakeSession::with_media(library_items()),
            &store,
            &settings(),
        )
        .await;
        assert_eq!(stats.inserted, 11);
        assert_eq!(stats.unchanged, 10);
        assert_eq!(fake.count_calls("GET mediaItems"), 1);
        assert_eq!(
            store.get_scan_date().await.unwrap().map(|d| d.to_rfc3339()),
            Some("2018-03-04T05:06:07+00:00".to_string())
        );
        assert_eq!(store.get_summary().await.unwrap().total_media, 21);
    }

    #[tokio::test]
    async fn test_incremental_scan_uses_checkpoint() {
        let store = SqliteStore::open_in_memory().unwrap();
        let checkpoint = date_utc(2017, 5, 1).unwrap();
        store.set_scan_date(checkpoint).await.unwrap();

        let (_, fake) = run(
            FakeSession::with_media(library_items()),
            &store,
            &settings(),
        )
        .await;
        let posted = fake.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        let range = &posted[0]["filters"]["dateFilter"]["ranges"][0];
        assert_eq!(range["startDate"]["year"], 2017);
        assert_eq!(range["startDate"]["month"], 5);
    }

    #[tokio::test]
    async fn test_rescan_ignores_checkpoint() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .set_scan_date(date_utc(2017, 5, 1).unwrap())
            .await
            .unwrap();
        let mut rescan = settings();
        rescan.rescan = true;
        let (stats, fake) = run(FakeSession::with_media(library_items()), &store, &rescan).await;
        assert_eq!(fake.count_calls("POST"), 0);
        assert_eq!(stats.inserted, 21);
    }

    #[tokio::test]
    async fn test_empty_page_with_token_continues() {
        let store = SqliteStore::open_in_memory().unwrap();
        let fake = FakeSession {
            empty_first_page: true,
            page_size: 7,
            ..FakeSession::with_media(library_items())
        };
        let (stats, fake) = run(fake, &store, &settings()).await;
        assert_eq!(stats.inserted, 21);
        // empty page + 3 pages of 7
        assert_eq!(fake.count_calls("GET mediaItems"), 4);
    }

    #[tokio::test]
    async fn test_skip_video_does_not_advance_checkpoint() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut items = library_items();
        items.push(media_item(
            "vid",
            "clip.mp4",
            "2019-01-01T00:00:00Z",
            "video/mp4",
        ));
        let mut no_video = settings();
        no_video.query.include_video = false;
        let (stats, _) = run(FakeSession::with_media(items), &store, &no_video).await;
        assert_eq!(stats.inserted, 21);
        assert_eq!(stats.skipped, 1);
        assert!(store.get_scan_date().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_album_scoped_run_skips_library() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut scoped = settings();
        scoped.album = Some("Holiday".into());
        let (stats, fake) = run(FakeSession::with_media(library_items()), &store, &scoped).await;
        assert_eq!(stats, IndexStats::default());
        assert!(fake.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_scan_leaves_checkpoint() {
        let store = SqliteStore::open_in_memory().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let fake = Arc::new(FakeSession::with_media(library_items()));
        let library = PhotosLibrary::new(fake.clone());
        let stats = index_library(&library, &store, &caps(), &settings(), &token)
            .await
            .unwrap();
        assert_eq!(stats.seen, 0);
        assert!(store.get_scan_date().await.unwrap().is_none());
    }
}
