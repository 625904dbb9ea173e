//! Album indexing: album rows, date spans and ordered membership.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::resolver;
use super::IndexSettings;
use crate::fs_caps::FilesystemCapabilities;
use crate::google::{GoogleAlbum, GoogleMedia, PhotosLibrary};
use crate::state::{AlbumRecord, LocalStore};
use crate::types::minimum_date;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AlbumStats {
    pub seen: u64,
    pub indexed: u64,
    pub unchanged: u64,
    pub memberships: u64,
}

/// Index shared albums, then owned albums.
///
/// An album whose declared item count matches the stored row is skipped
/// unless `flush_albums` is set. Cancellation is honoured between albums so
/// that a membership list is never left half rebuilt.
pub async fn index_albums(
    library: &PhotosLibrary,
    store: &dyn LocalStore,
    caps: &FilesystemCapabilities,
    settings: &IndexSettings,
    shutdown_token: &CancellationToken,
) -> Result<AlbumStats> {
    let mut stats = AlbumStats::default();
    if !settings.skip_shared_albums {
        index_album_list(true, library, store, caps, settings, shutdown_token, &mut stats).await?;
    }
    index_album_list(false, library, store, caps, settings, shutdown_token, &mut stats).await?;

    tracing::info!(
        seen = stats.seen,
        indexed = stats.indexed,
        unchanged = stats.unchanged,
        "Album index finished"
    );
    Ok(stats)
}

#[allow(clippy::too_many_arguments)]
async fn index_album_list(
    shared: bool,
    library: &PhotosLibrary,
    store: &dyn LocalStore,
    caps: &FilesystemCapabilities,
    settings: &IndexSettings,
    shutdown_token: &CancellationToken,
    stats: &mut AlbumStats,
) -> Result<()> {
    let kind = if shared { "shared" } else { "owned" };
    let mut page_token: Option<String> = None;
    loop {
        let page = library
            .list_albums(shared, page_token.as_deref())
            .await
            .with_context(|| format!("Failed to list {kind} albums"))?;

        for json in page.albums {
            if shutdown_token.is_cancelled() {
                tracing::info!("Shutdown requested, stopping album index");
                return Ok(());
            }
            let album = GoogleAlbum::new(json, shared);
            if let Some(wanted) = &settings.album {
                if album.title() != wanted {
                    continue;
                }
            }
            stats.seen += 1;

            if !settings.flush_albums {
                if let Some(stored) = store.get_album(album.id()).await? {
                    if stored.size == album.size() {
                        tracing::debug!(album = %album.title(), "Album unchanged");
                        stats.unchanged += 1;
                        continue;
                    }
                }
            }

            stats.memberships += index_album_contents(&album, library, store, caps, settings)
                .await
                .with_context(|| format!("Failed to index album '{}'", album.title()))?;
            stats.indexed += 1;
        }

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => return Ok(()),
        }
    }
}

/// Rebuild one album's membership and store its row. Returns the number of
/// memberships written.
///
/// Every page is fetched before the stored membership is touched, so a
/// failed listing leaves the previous membership and album row in place.
async fn index_album_contents(
    album: &GoogleAlbum,
    library: &PhotosLibrary,
    store: &dyn LocalStore,
    caps: &FilesystemCapabilities,
    settings: &IndexSettings,
) -> Result<u64> {
    tracing::info!(album = %album.title(), shared = album.is_shared, "Indexing album");

    let mut members: Vec<String> = Vec::new();
    let mut first: Option<DateTime<Utc>> = None;
    let mut last: Option<DateTime<Utc>> = None;
    let mut page_token: Option<String> = None;
    loop {
        let page = library.album_media(album.id(), page_token.as_deref()).await?;
        for json in page.media_items {
            let mut media = GoogleMedia::new(json, caps);
            let created = media.create_date();
            first = Some(first.map_or(created, |f| f.min(created)));
            last = Some(last.map_or(created, |l| l.max(created)));
            if !settings.query.include_video && media.is_video() {
                continue;
            }

            // Items of other people's shared albums are absent from the
            // library listing and enter the index here.
            media.set_path_by_date(&settings.photos_folder, settings.flat_path);
            resolver::resolve_and_store(store, &mut media).await?;
            members.push(media.id().to_string());
        }
        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    store.clear_album_files(album.id()).await?;
    for (position, media_id) in (1u32..).zip(&members) {
        store.put_album_file(album.id(), media_id, position).await?;
    }
    store
        .put_album(&AlbumRecord {
            remote_id: album.id().to_string(),
            album_name: album.title().to_string(),
            size: album.size(),
            start_date: first.unwrap_or_else(minimum_date),
            end_date: last.unwrap_or_else(minimum_date),
            sync_date: Utc::now(),
            downloaded: false,
            is_shared: album.is_shared,
        })
        .await?;
    Ok(members.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::session::testing::{album_json, media_item, FakeAlbum, FakeSession};
    use crate::index::tests::settings;
    use crate::state::SqliteStore;
    use serde_json::Value;
    use std::sync::Arc;

    fn caps() -> FilesystemCapabilities {
        FilesystemCapabilities {
            windows_names: false,
            ..Default::default()
        }
    }

    fn media(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| {
                media_item(
                    &format!("m{i}"),
                    &format!("p{i}.jpg"),
                    &format!("2017-09-{:02}T10:00:00Z", 19 + i),
                    "image/jpeg",
                )
            })
            .collect()
    }

    fn album(id: &str, title: &str, members: &[&str], shared: bool) -> FakeAlbum {
        FakeAlbum {
            json: album_json(id, title, members.len()),
            members: members.iter().map(|s| s.to_string()).collect(),
            shared,
        }
    }

    async fn run(
        fake: FakeSession,
        store: &SqliteStore,
        settings: &IndexSettings,
    ) -> (AlbumStats, Arc<FakeSession>) {
        let fake = Arc::new(fake);
        let library = PhotosLibrary::new(fake.clone());
        let stats = index_albums(
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
    async fn test_album_rows_and_membership() {
        let store = SqliteStore::open_in_memory().unwrap();
        let fake = FakeSession {
            albums: vec![album("a1", "Trip", &["m0", "m2", "m1"], false)],
            ..FakeSession::with_media(media(3))
        };
        let (stats, _) = run(fake, &store, &settings()).await;
        assert_eq!(stats.indexed, 1);
        assert_eq!(stats.memberships, 3);

        let row = store.get_album("a1").await.unwrap().unwrap();
        assert_eq!(row.album_name, "Trip");
        assert_eq!(row.size, 3);
        assert_eq!(row.start_date.to_rfc3339(), "2017-09-19T10:00:00+00:00");
        assert_eq!(row.end_date.to_rfc3339(), "2017-09-21T10:00:00+00:00");
        assert!(!row.downloaded);

        let files = store.get_album_files(false, false).await.unwrap();
        let order: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(order, ["p0.jpg", "p2.jpg", "p1.jpg"]);
        assert_eq!(store.get_summary().await.unwrap().total_media, 3);
    }

    #[tokio::test]
    async fn test_unchanged_album_is_skipped() {
        let store = SqliteStore::open_in_memory().unwrap();
        let make = || FakeSession {
            albums: vec![album("a1", "Trip", &["m0", "m1"], false)],
            ..FakeSession::with_media(media(2))
        };
        run(make(), &store, &settings()).await;
        let (stats, fake) = run(make(), &store, &settings()).await;
        assert_eq!(stats.unchanged, 1);
        assert_eq!(fake.count_calls("POST mediaItems:search"), 0);

        let mut flush = settings();
        flush.flush_albums = true;
        let (stats, fake) = run(make(), &store, &flush).await;
        assert_eq!(stats.indexed, 1);
        assert_eq!(fake.count_calls("POST mediaItems:search"), 1);
    }

    #[tokio::test]
    async fn test_changed_album_replaces_membership() {
        let store = SqliteStore::open_in_memory().unwrap();
        let before = FakeSession {
            albums: vec![album("a1", "Trip", &["m0", "m1", "m2"], false)],
            ..FakeSession::with_media(media(4))
        };
        run(before, &store, &settings()).await;

        let after = FakeSession {
            albums: vec![album("a1", "Trip", &["m3", "m1"], false)],
            ..FakeSession::with_media(media(4))
        };
        run(after, &store, &settings()).await;
        let files = store.get_album_files(false, true).await.unwrap();
        let order: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(order, ["p3.jpg", "p1.jpg"]);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_previous_membership() {
        let store = SqliteStore::open_in_memory().unwrap();
        let make = || FakeSession {
            albums: vec![album("a1", "Trip", &["m0", "m1", "m2", "m3"], false)],
            page_size: 2,
            ..FakeSession::with_media(media(4))
        };
        run(make(), &store, &settings()).await;
        assert_eq!(store.get_album_files(false, true).await.unwrap().len(), 4);

        let mut flush = settings();
        flush.flush_albums = true;
        let failing = Arc::new(FakeSession {
            fail_album_continuation: true,
            ..make()
        });
        let result = index_albums(
            &PhotosLibrary::new(failing),
            &store,
            &caps(),
            &flush,
            &CancellationToken::new(),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(store.get_album_files(false, true).await.unwrap().len(), 4);

        let (stats, _) = run(make(), &store, &settings()).await;
        assert_eq!(stats.unchanged, 1);
        assert_eq!(store.get_album_files(false, true).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_shared_albums_first_and_skippable() {
        let store = SqliteStore::open_in_memory().unwrap();
        let make = || FakeSession {
            albums: vec![
                album("own", "Mine", &["m0"], false),
                album("sh", "Theirs", &["m1"], true),
            ],
            ..FakeSession::with_media(media(2))
        };
        let (stats, fake) = run(make(), &store, &settings()).await;
        assert_eq!(stats.indexed, 2);
        let calls = fake.calls.lock().unwrap().clone();
        let shared_at = calls.iter().position(|c| c == "GET sharedAlbums").unwrap();
        let owned_at = calls.iter().position(|c| c == "GET albums").unwrap();
        assert!(shared_at < owned_at);
        assert!(store.get_album("sh").await.unwrap().unwrap().is_shared);

        let store = SqliteStore::open_in_memory().unwrap();
        let mut skip = settings();
        skip.skip_shared_albums = true;
        let (stats, fake) = run(make(), &store, &skip).await;
        assert_eq!(stats.indexed, 1);
        assert_eq!(fake.count_calls("GET sharedAlbums"), 0);
    }

    #[tokio::test]
    async fn test_album_name_filter() {
        let store = SqliteStore::open_in_memory().unwrap();
        let fake = FakeSession {
            albums: vec![
                album("a1", "Trip", &["m0"], false),
                album("a2", "Other", &["m1"], false),
            ],
            ..FakeSession::with_media(media(2))
        };
        let mut scoped = settings();
        scoped.album = Some("Trip".into());
        let (stats, _) = run(fake, &store, &scoped).await;
        assert_eq!(stats.seen, 1);
        assert!(store.get_album("a2").await.unwrap().is_none());
        // The album's items are indexed even though the library scan is skipped
        assert_eq!(store.get_summary().await.unwrap().total_media, 1);
    }

    #[tokio::test]
    async fn test_videos_left_out_of_membership() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut items = media(1);
        items.push(media_item(
            "v",
            "clip.mp4",
            "2017-10-01T00:00:00Z",
            "video/mp4",
        ));
        let fake = FakeSession {
            albums: vec![album("a1", "Trip", &["m0", "v"], false)],
            ..FakeSession::with_media(items)
        };
        let mut no_video = settings();
        no_video.query.include_video = false;
        let (stats, _) = run(fake, &store, &no_video).await;
        assert_eq!(stats.memberships, 1);
        // Dates still span the whole album
        let row = store.get_album("a1").await.unwrap().unwrap();
        assert_eq!(row.end_date.to_rfc3339(), "2017-10-01T00:00:00+00:00");
    }
}
