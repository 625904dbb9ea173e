//! Album link tree: `albums/<date> <name>/NNNN_<filename>` entries pointing
//! at the canonical files under `photos/`.
//!
//! The whole tree is deleted and rebuilt on every run.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use filetime::FileTime;
use tokio_util::sync::CancellationToken;

use crate::fs_caps::{make_symlink, FilesystemCapabilities};
use crate::state::{AlbumFileEntry, LocalStore};

pub const ALBUMS_FOLDER: &str = "albums";

/// Bytes kept free below an album folder for its `NNNN_<filename>` links.
const LINK_NAME_RESERVE: usize = 32;

/// Subset of application config consumed by the album linker.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub(crate) root: PathBuf,
    pub(crate) use_hardlinks: bool,
    /// Name album folders after the first item's date instead of the last.
    pub(crate) use_start_date: bool,
    pub(crate) flat_path: bool,
    pub(crate) omit_album_date: bool,
    /// Number links in descending album position.
    pub(crate) album_invert: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub albums: u64,
    pub links: u64,
    /// Members whose file has not been downloaded yet.
    pub missing: u64,
}

/// Rebuild the album link tree from the store.
///
/// Linking is skipped with a warning when the filesystem supports neither
/// symlinks nor, if requested, hardlinks.
pub async fn create_album_links(
    store: &dyn LocalStore,
    caps: &FilesystemCapabilities,
    settings: &LinkSettings,
    shutdown_token: &CancellationToken,
) -> Result<LinkStats> {
    if !caps.symlinks && !settings.use_hardlinks {
        tracing::warn!("Filesystem does not support symlinks, album links disabled");
        return Ok(LinkStats::default());
    }

    // The tree is rebuilt from scratch each run, so every album is asked for
    // again. The per-album flag set below only feeds the `status` counts.
    let entries = store
        .get_album_files(settings.album_invert, true)
        .await?;
    tracing::info!(memberships = entries.len(), "Creating album links");

    let caps = *caps;
    let settings_clone = settings.clone();
    let token = shutdown_token.clone();
    let (stats, linked) = tokio::task::spawn_blocking(move || {
        build_tree(&entries, &caps, &settings_clone, &token)
    })
    .await??;

    for album_id in &linked {
        store.put_album_downloaded(album_id).await?;
    }
    tracing::info!(
        albums = stats.albums,
        links = stats.links,
        missing = stats.missing,
        "Album links created"
    );
    Ok(stats)
}

/// Returns the stats and the ids of albums whose folder was built.
fn build_tree(
    entries: &[AlbumFileEntry],
    caps: &FilesystemCapabilities,
    settings: &LinkSettings,
    shutdown_token: &CancellationToken,
) -> Result<(LinkStats, Vec<String>)> {
    let links_root = settings.root.join(ALBUMS_FOLDER);
    if links_root.exists() {
        fs::remove_dir_all(&links_root)
            .with_context(|| format!("Failed to remove {}", links_root.display()))?;
    }

    let mut stats = LinkStats::default();
    let mut linked: Vec<String> = Vec::new();
    let mut used_folders: HashSet<String> = HashSet::new();
    let mut current_album: Option<&str> = None;
    let mut folder_rel = PathBuf::new();
    let mut index = 0u32;

    for entry in entries {
        if current_album != Some(entry.album_remote_id.as_str()) {
            if shutdown_token.is_cancelled() {
                tracing::info!("Shutdown requested, stopping album links");
                break;
            }
            current_album = Some(&entry.album_remote_id);
            folder_rel = unique_album_folder(entry, caps, settings, &mut used_folders);
            index = 0;
            stats.albums += 1;
            linked.push(entry.album_remote_id.clone());
        }
        index += 1;

        let target_rel = Path::new(&entry.relative_folder).join(&entry.filename);
        let source = settings.root.join(&target_rel);
        if !source.exists() {
            tracing::debug!(path = %target_rel.display(), "Not downloaded yet, no link");
            stats.missing += 1;
            continue;
        }

        let folder = settings.root.join(&folder_rel);
        fs::create_dir_all(&folder)
            .with_context(|| format!("Failed to create {}", folder.display()))?;
        let link_name = caps.fit_in_path(&folder, &format!("{index:04}_{}", entry.filename));
        let link = folder.join(&link_name);

        let made = if settings.use_hardlinks {
            fs::hard_link(&source, &link)
        } else {
            make_symlink(&relative_target(&folder_rel, &target_rel), &link)
        };
        match made {
            Ok(()) => stats.links += 1,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::warn!(link = %link.display(), "Link name already taken, skipping");
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create link {}", link.display()))
            }
        }

        if !settings.use_hardlinks {
            // Not every platform can stamp a symlink itself.
            let atime = clamped(entry.modify_date);
            let mtime = clamped(entry.create_date);
            if let Err(e) = filetime::set_symlink_file_times(&link, atime, mtime) {
                tracing::debug!(link = %link.display(), error = %e, "Could not set link times");
            }
        }
    }
    Ok((stats, linked))
}

fn clamped(date: DateTime<Utc>) -> FileTime {
    FileTime::from_unix_time(date.timestamp().max(0), 0)
}

/// Album folder below `albums/` as (parent, name): `YYYY` and `MMDD name`,
/// `YYYY-MMDD name` when flat, or just the name when dates are omitted. The
/// date is the album's last item unless `use_start_date` is set.
fn album_folder(
    entry: &AlbumFileEntry,
    caps: &FilesystemCapabilities,
    settings: &LinkSettings,
) -> (PathBuf, String) {
    if settings.omit_album_date {
        return (PathBuf::new(), caps.valid_file_name(&entry.album_name));
    }
    let date = if settings.use_start_date {
        entry.start_date
    } else {
        entry.end_date
    };
    if settings.flat_path {
        let name = format!("{} {}", date.format("%Y-%m%d"), entry.album_name);
        (PathBuf::new(), caps.valid_file_name(&name))
    } else {
        let name = format!("{} {}", date.format("%m%d"), entry.album_name);
        (
            PathBuf::from(format!("{:04}", date.year())),
            caps.valid_file_name(&name),
        )
    }
}

/// Album folder relative to the sync root, cut to leave room for its links
/// under `max_path`. Albums that land on an already used folder get a
/// ` (n)` suffix.
fn unique_album_folder(
    entry: &AlbumFileEntry,
    caps: &FilesystemCapabilities,
    settings: &LinkSettings,
    used: &mut HashSet<String>,
) -> PathBuf {
    let (parent, name) = album_folder(entry, caps, settings);
    let parent_rel = Path::new(ALBUMS_FOLDER).join(parent);
    let parent_abs = settings.root.join(&parent_rel);

    let mut n = 1u32;
    loop {
        let suffix = if n == 1 { String::new() } else { format!(" ({n})") };
        let base = caps.fit_dir_in_path(&parent_abs, &name, LINK_NAME_RESERVE + suffix.len());
        let folder_rel = parent_rel.join(format!("{base}{suffix}"));
        let key = folder_rel.to_string_lossy();
        let key = if caps.case_insensitive {
            key.to_lowercase()
        } else {
            key.into_owned()
        };
        if used.insert(key) {
            if n > 1 {
                tracing::debug!(
                    album = %entry.album_name,
                    folder = %folder_rel.display(),
                    "Album folder name taken, using a suffix"
                );
            }
            return folder_rel;
        }
        n += 1;
    }
}

/// Path from a link inside `link_dir` to `target`, both relative to the sync
/// root, so the tree survives the root being moved.
fn relative_target(link_dir: &Path, target: &Path) -> PathBuf {
    let depth = link_dir
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count();
    let mut rel = PathBuf::new();
    for _ in 0..depth {
        rel.push("..");
    }
    rel.join(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::session::testing::{album_json, media_item, FakeAlbum, FakeSession};
    use crate::google::{MediaQuery, PhotosLibrary};
    use crate::index::albums::index_albums;
    use crate::index::IndexSettings;
    use crate::state::SqliteStore;
    use crate::types::date_utc;
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn caps() -> FilesystemCapabilities {
        FilesystemCapabilities {
            windows_names: false,
            ..Default::default()
        }
    }

    fn link_settings(root: &Path) -> LinkSettings {
        LinkSettings {
            root: root.to_path_buf(),
            use_hardlinks: false,
            use_start_date: false,
            flat_path: false,
            omit_album_date: false,
            album_invert: false,
        }
    }

    fn index_settings() -> IndexSettings {
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

    fn library_media() -> Vec<Value> {
        ["19", "20", "20", "23"]
            .iter()
            .enumerate()
            .map(|(i, day)| {
                media_item(
                    &format!("m{i}"),
                    &format!("p{i}.jpg"),
                    &format!("2017-09-{day}T10:00:00Z"),
                    "image/jpeg",
                )
            })
            .collect()
    }

    /// Place every library file on disk as if downloaded.
    fn write_photos(root: &Path) {
        let dir = root.join("photos/2017/09");
        fs::create_dir_all(&dir).unwrap();
        for i in 0..4 {
            fs::write(dir.join(format!("p{i}.jpg")), format!("photo {i}")).unwrap();
        }
    }

    async fn index_album(store: &SqliteStore, members: &[&str]) {
        let fake = Arc::new(FakeSession {
            albums: vec![FakeAlbum {
                json: album_json("a1", "Trip", members.len()),
                members: members.iter().map(|s| s.to_string()).collect(),
                shared: false,
            }],
            ..FakeSession::with_media(library_media())
        });
        let library = PhotosLibrary::new(fake);
        index_albums(
            &library,
            store,
            &caps(),
            &index_settings(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_rebuild_after_album_grows() {
        let tmp = TempDir::new().unwrap();
        write_photos(tmp.path());
        let store = SqliteStore::open_in_memory().unwrap();
        let settings = link_settings(tmp.path());
        let token = CancellationToken::new();

        index_album(&store, &["m0", "m1", "m2"]).await;
        let stats = create_album_links(&store, &caps(), &settings, &token)
            .await
            .unwrap();
        assert_eq!(stats.links, 3);
        let old = tmp.path().join("albums/2017/0920 Trip");
        assert_eq!(names(&old), ["0001_p0.jpg", "0002_p1.jpg", "0003_p2.jpg"]);
        assert!(store.get_album("a1").await.unwrap().unwrap().downloaded);

        index_album(&store, &["m0", "m1", "m2", "m3"]).await;
        let stats = create_album_links(&store, &caps(), &settings, &token)
            .await
            .unwrap();
        assert_eq!(stats.links, 4);
        assert!(!old.exists());
        let new = tmp.path().join("albums/2017/0923 Trip");
        assert_eq!(names(&new).len(), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_are_relative() {
        let tmp = TempDir::new().unwrap();
        write_photos(tmp.path());
        let store = SqliteStore::open_in_memory().unwrap();
        index_album(&store, &["m1"]).await;
        create_album_links(
            &store,
            &caps(),
            &link_settings(tmp.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let link = tmp.path().join("albums/2017/0920 Trip/0001_p1.jpg");
        assert_eq!(
            fs::read_link(&link).unwrap(),
            Path::new("../../../photos/2017/09/p1.jpg")
        );
        assert_eq!(fs::read_to_string(&link).unwrap(), "photo 1");
    }

    #[tokio::test]
    async fn test_hardlinks_and_missing_source() {
        let tmp = TempDir::new().unwrap();
        write_photos(tmp.path());
        fs::remove_file(tmp.path().join("photos/2017/09/p2.jpg")).unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        index_album(&store, &["m0", "m2"]).await;

        let settings = LinkSettings {
            use_hardlinks: true,
            ..link_settings(tmp.path())
        };
        let stats = create_album_links(&store, &caps(), &settings, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.links, 1);
        assert_eq!(stats.missing, 1);
        let link = tmp.path().join("albums/2017/0920 Trip/0001_p0.jpg");
        assert!(!fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&link).unwrap(), "photo 0");
    }

    #[tokio::test]
    async fn test_invert_numbering() {
        let tmp = TempDir::new().unwrap();
        write_photos(tmp.path());
        let store = SqliteStore::open_in_memory().unwrap();
        index_album(&store, &["m0", "m1"]).await;
        let settings = LinkSettings {
            album_invert: true,
            ..link_settings(tmp.path())
        };
        create_album_links(&store, &caps(), &settings, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            names(&tmp.path().join("albums/2017/0920 Trip")),
            ["0001_p1.jpg", "0002_p0.jpg"]
        );
    }

    #[tokio::test]
    async fn test_disabled_without_symlinks() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let no_links = FilesystemCapabilities {
            symlinks: false,
            ..caps()
        };
        let stats = create_album_links(
            &store,
            &no_links,
            &link_settings(tmp.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(stats, LinkStats::default());
        assert!(!tmp.path().join(ALBUMS_FOLDER).exists());
    }

    fn entry(name: &str) -> AlbumFileEntry {
        let start = date_utc(2017, 9, 19).unwrap();
        let end = date_utc(2017, 9, 23).unwrap();
        AlbumFileEntry {
            relative_folder: "photos/2017/09".into(),
            filename: "a.jpg".into(),
            album_name: name.into(),
            start_date: start,
            end_date: end,
            album_remote_id: "a1".into(),
            sync_date: end,
            position: 1,
            create_date: start,
            modify_date: start,
        }
    }

    fn folder(entry: &AlbumFileEntry, settings: &LinkSettings) -> PathBuf {
        let (parent, name) = album_folder(entry, &caps(), settings);
        parent.join(name)
    }

    #[test]
    fn test_album_folder_layouts() {
        let root = Path::new("/r");
        let base = link_settings(root);
        assert_eq!(folder(&entry("Trip"), &base), Path::new("2017/0923 Trip"));
        let start = LinkSettings {
            use_start_date: true,
            ..base.clone()
        };
        assert_eq!(folder(&entry("Trip"), &start), Path::new("2017/0919 Trip"));
        let flat = LinkSettings {
            flat_path: true,
            ..base.clone()
        };
        assert_eq!(folder(&entry("Trip"), &flat), Path::new("2017-0923 Trip"));
        let omit = LinkSettings {
            omit_album_date: true,
            ..base.clone()
        };
        assert_eq!(folder(&entry("Trip/Day 1"), &omit), Path::new("Trip_Day 1"));
    }

    #[test]
    fn test_same_named_albums_get_distinct_folders() {
        let settings = link_settings(Path::new("/r"));
        let mut used = HashSet::new();
        let first = unique_album_folder(&entry("Trip"), &caps(), &settings, &mut used);
        let second = unique_album_folder(&entry("Trip"), &caps(), &settings, &mut used);
        assert_eq!(first, Path::new("albums/2017/0923 Trip"));
        assert_eq!(second, Path::new("albums/2017/0923 Trip (2)"));
    }

    #[tokio::test]
    async fn test_long_album_name_fits_max_path() {
        let tmp = TempDir::new().unwrap();
        write_photos(tmp.path());
        let store = SqliteStore::open_in_memory().unwrap();
        let long_name = "x".repeat(150);
        let fake = Arc::new(FakeSession {
            albums: vec![FakeAlbum {
                json: album_json("a1", &long_name, 3),
                members: vec!["m0".into(), "m1".into(), "m2".into()],
                shared: false,
            }],
            ..FakeSession::with_media(library_media())
        });
        index_albums(
            &PhotosLibrary::new(fake),
            &store,
            &caps(),
            &index_settings(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let max_path = tmp.path().as_os_str().len() + 120;
        let short = FilesystemCapabilities { max_path, ..caps() };
        let stats = create_album_links(
            &store,
            &short,
            &link_settings(tmp.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(stats.links, 3);

        let year = tmp.path().join("albums/2017");
        let folders = names(&year);
        assert_eq!(folders.len(), 1);
        let album_dir = year.join(&folders[0]);
        assert!(folders[0].starts_with("0920 xxx"));
        assert_eq!(
            names(&album_dir),
            ["0001_p0.jpg", "0002_p1.jpg", "0003_p2.jpg"]
        );
        for link in names(&album_dir) {
            assert!(album_dir.join(link).as_os_str().len() <= max_path);
        }
    }

    #[tokio::test]
    async fn test_same_named_albums_keep_all_links() {
        let tmp = TempDir::new().unwrap();
        write_photos(tmp.path());
        let store = SqliteStore::open_in_memory().unwrap();
        let fake = Arc::new(FakeSession {
            albums: vec![
                FakeAlbum {
                    json: album_json("a1", "Trip", 1),
                    members: vec!["m1".into()],
                    shared: false,
                },
                FakeAlbum {
                    json: album_json("a2", "Trip", 1),
                    members: vec!["m2".into()],
                    shared: false,
                },
            ],
            ..FakeSession::with_media(library_media())
        });
        index_albums(
            &PhotosLibrary::new(fake),
            &store,
            &caps(),
            &index_settings(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let stats = create_album_links(
            &store,
            &caps(),
            &link_settings(tmp.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(stats.links, 2);
        assert_eq!(
            names(&tmp.path().join("albums/2017")),
            ["0920 Trip", "0920 Trip (2)"]
        );
        assert_eq!(store.get_summary().await.unwrap().linked_albums, 2);
    }

    #[test]
    fn test_relative_target() {
        assert_eq!(
            relative_target(Path::new("albums/2017-0923 Trip"), Path::new("photos/2017/09/a.jpg")),
            Path::new("../../photos/2017/09/a.jpg")
        );
    }
}
