//! Persistent list of remote ids that failed to download.
//!
//! Listed ids are skipped on every run until the file is deleted, either by
//! hand or with the `clear-quarantine` command.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const BAD_IDS_FILE: &str = "gphotos.bad_ids.yaml";

/// Why one item is quarantined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadItem {
    /// Local path relative to the sync root.
    pub path: String,
    pub product_url: String,
    pub error: String,
}

#[derive(Debug)]
pub struct BadIds {
    file: PathBuf,
    items: BTreeMap<String, BadItem>,
    dirty: bool,
}

impl BadIds {
    /// Load the quarantine file under `root`; a missing file is an empty list.
    pub fn load(root: &Path) -> Result<Self> {
        let file = root.join(BAD_IDS_FILE);
        let items = match std::fs::read_to_string(&file) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_yaml::from_str(&text)
                .with_context(|| format!("Failed to parse {}", file.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", file.display()))
            }
        };
        if !items.is_empty() {
            tracing::info!(
                count = items.len(),
                file = %file.display(),
                "Skipping quarantined items; delete the file to retry them"
            );
        }
        Ok(Self {
            file,
            items,
            dirty: false,
        })
    }

    pub fn contains(&self, remote_id: &str) -> bool {
        self.items.contains_key(remote_id)
    }

    /// Quarantine an item. Returns false if it was already listed.
    pub fn add(&mut self, remote_id: &str, item: BadItem) -> bool {
        if self.items.contains_key(remote_id) {
            return false;
        }
        tracing::warn!(id = %remote_id, path = %item.path, error = %item.error, "Quarantined");
        self.items.insert(remote_id.to_string(), item);
        self.dirty = true;
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Rewrite the file if anything was added.
    pub fn store(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let text = serde_yaml::to_string(&self.items).context("Failed to encode quarantine")?;
        let tmp = self.file.with_extension("yaml.tmp");
        std::fs::write(&tmp, text)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.file)
            .with_context(|| format!("Failed to replace {}", self.file.display()))?;
        self.dirty = false;
        Ok(())
    }

    /// Delete the quarantine file under `root`. Returns whether one existed.
    pub fn clear(root: &Path) -> Result<bool> {
        let file = root.join(BAD_IDS_FILE);
        match std::fs::remove_file(&file) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", file.display())),
        }
    }
}
