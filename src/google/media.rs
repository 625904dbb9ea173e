//! Remote media item adapter.
//!
//! [`GoogleMedia`] wraps one `mediaItems` JSON record. Accessors never fail:
//! missing optional fields read as empty strings and unparseable dates as the
//! sentinel minimum date.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use serde_json::Value;

use crate::fs_caps::FilesystemCapabilities;
use crate::state::MediaRecord;
use crate::types::minimum_date;

/// Remote titles sometimes echo back a local duplicate suffix: `name (2).jpg`.
static DUPLICATE_MATCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*) \((\d+)\)\.(.*)$").expect("valid duplicate pattern")
});

#[derive(Debug, Clone)]
pub struct GoogleMedia {
    json: Value,
    caps: FilesystemCapabilities,
    /// Assigned by the resolver; 0 means no suffix.
    pub duplicate_number: u32,
    relative_folder: String,
}

impl GoogleMedia {
    pub fn new(json: Value, caps: &FilesystemCapabilities) -> Self {
        Self {
            json,
            caps: *caps,
            duplicate_number: 0,
            relative_folder: String::new(),
        }
    }

    fn str_field(&self, key: &str) -> &str {
        self.json[key].as_str().unwrap_or_default()
    }

    pub fn id(&self) -> &str {
        self.str_field("id")
    }

    /// Remote title with any `(n)` suffix removed, sanitized for the local
    /// filesystem and lowercased on case-insensitive filesystems.
    pub fn orig_name(&self) -> String {
        let raw = self.str_field("filename");
        let name = match DUPLICATE_MATCH.captures(raw) {
            Some(caps) => format!("{}.{}", &caps[1], &caps[3]),
            None => raw.to_string(),
        };
        let name = if name.is_empty() {
            self.id().to_string()
        } else {
            name
        };
        let valid = self.caps.valid_file_name(&name);
        if self.caps.case_insensitive {
            valid.to_lowercase()
        } else {
            valid
        }
    }

    /// Local name: `orig_name`, with ` (n+1)` before the extension for the
    /// nth duplicate.
    pub fn filename(&self) -> String {
        let orig = self.orig_name();
        if self.duplicate_number == 0 {
            orig
        } else {
            self.caps
                .with_suffix(&orig, &format!(" ({})", self.duplicate_number + 1))
        }
    }

    pub fn mime_type(&self) -> &str {
        self.str_field("mimeType")
    }

    pub fn is_video(&self) -> bool {
        self.mime_type().starts_with("video")
    }

    pub fn description(&self) -> &str {
        self.str_field("description")
    }

    pub fn product_url(&self) -> &str {
        self.str_field("productUrl")
    }

    /// Short-lived base URL; only valid for about an hour after it was fetched.
    pub fn base_url(&self) -> &str {
        self.str_field("baseUrl")
    }

    /// Original-quality download URL: `=dv` for videos, `=d` for images.
    pub fn download_url(&self) -> String {
        let suffix = if self.is_video() { "=dv" } else { "=d" };
        format!("{}{suffix}", self.base_url())
    }

    pub fn create_date(&self) -> DateTime<Utc> {
        self.json["mediaMetadata"]["creationTime"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(minimum_date)
    }

    /// The API exposes no modification time; creation time stands in.
    pub fn modify_date(&self) -> DateTime<Utc> {
        self.create_date()
    }

    pub fn relative_folder(&self) -> &str {
        &self.relative_folder
    }

    /// Place the item under `<root_folder>/YYYY/MM`, or `<root_folder>/YYYY-MM`
    /// when `flat`.
    pub fn set_path_by_date(&mut self, root_folder: &str, flat: bool) {
        let date = self.create_date();
        self.relative_folder = if flat {
            format!("{root_folder}/{:04}-{:02}", date.year(), date.month())
        } else {
            format!("{root_folder}/{:04}/{:02}", date.year(), date.month())
        };
    }

    /// Keep an already indexed item at the folder it was first stored under.
    pub(crate) fn set_relative_folder(&mut self, folder: &str) {
        self.relative_folder = folder.to_string();
    }

    pub fn to_record(&self) -> MediaRecord {
        MediaRecord {
            id: None,
            remote_id: self.id().to_string(),
            uid: None,
            url: self.product_url().to_string(),
            relative_folder: self.relative_folder.clone(),
            filename: self.filename(),
            orig_filename: self.orig_name(),
            duplicate_number: self.duplicate_number,
            size: 0,
            mime_type: self.mime_type().to_string(),
            description: self.description().to_string(),
            modify_date: self.modify_date(),
            create_date: self.create_date(),
            sync_date: Utc::now(),
            downloaded: false,
            location: None,
        }
    }
}
