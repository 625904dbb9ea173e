//! Removal of local media files the store no longer knows about.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::state::LocalStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub checked: u64,
    /// Deleted, or that would be deleted on a dry run.
    pub removed: u64,
}

/// Bookkeeping files, probe leftovers and in-progress downloads are never
/// media.
fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || name.starts_with("gphotos")
}

/// `(folder, filename)` of every media file under `root/<photos_folder>`,
/// with the folder relative to `root` and `/`-separated as in the store.
fn media_files(root: &Path, photos_folder: &str) -> Result<Vec<(String, String, PathBuf)>> {
    let photos = root.join(photos_folder);
    if !photos.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(&photos).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", photos.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            tracing::warn!(path = %entry.path().display(), "Skipping non UTF-8 file name");
            continue;
        };
        if is_ignored(name) {
            continue;
        }
        let folder = entry
            .path()
            .parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default();
        files.push((folder, name.to_string(), entry.path().to_path_buf()));
    }
    Ok(files)
}

/// Delete files under `root/<photos_folder>` whose path has no row in the
/// store. With `dry_run` the files are only reported.
pub async fn remove_untracked(
    store: &dyn LocalStore,
    root: &Path,
    photos_folder: &str,
    dry_run: bool,
) -> Result<ReconcileStats> {
    let root_owned = root.to_path_buf();
    let folder_owned = photos_folder.to_string();
    let files =
        tokio::task::spawn_blocking(move || media_files(&root_owned, &folder_owned)).await??;

    let mut stats = ReconcileStats::default();
    for (folder, name, path) in files {
        stats.checked += 1;
        if store.get_file_by_path(&folder, &name).await?.is_some() {
            continue;
        }
        stats.removed += 1;
        if dry_run {
            tracing::info!("[DRY RUN] Would remove {}", path.display());
            continue;
        }
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        tracing::info!("Removed {}", path.display());
    }

    tracing::info!(
        checked = stats.checked,
        removed = stats.removed,
        dry_run,
        "Reconcile finished"
    );
    Ok(stats)
}
