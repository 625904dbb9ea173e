//! Filesystem capabilities of the sync root.
//!
//! Probed once at startup and passed by reference to everything that builds
//! local names: media filenames, album folder names and link names.

use std::fs;
use std::io;
use std::path::Path;

/// What the filesystem under the sync root can store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilesystemCapabilities {
    /// Longest single path component, in bytes.
    pub max_filename: usize,
    /// Longest full path, in bytes.
    pub max_path: usize,
    pub case_insensitive: bool,
    pub symlinks: bool,
    pub unicode: bool,
    /// Apply NTFS naming rules (reserved characters, no trailing dot or space).
    pub windows_names: bool,
}

impl Default for FilesystemCapabilities {
    fn default() -> Self {
        Self {
            max_filename: 255,
            max_path: if cfg!(windows) { 260 } else { 4096 },
            case_insensitive: false,
            symlinks: true,
            unicode: true,
            windows_names: cfg!(windows),
        }
    }
}

impl FilesystemCapabilities {
    /// Probe `root` by creating scratch files in a hidden directory.
    ///
    /// `ntfs` forces NTFS naming rules regardless of platform, for Linux hosts
    /// writing to an NTFS or SMB mount.
    pub fn probe(root: &Path, ntfs: bool) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let scratch = root.join(format!(".gphotos-probe-{}", uuid::Uuid::new_v4().simple()));
        fs::create_dir(&scratch)?;
        let result = Self::probe_in(&scratch, ntfs);
        if let Err(e) = fs::remove_dir_all(&scratch) {
            tracing::warn!(path = %scratch.display(), error = %e, "Failed to remove probe directory");
        }
        let caps = result?;
        tracing::debug!(
            case_insensitive = caps.case_insensitive,
            symlinks = caps.symlinks,
            unicode = caps.unicode,
            windows_names = caps.windows_names,
            max_path = caps.max_path,
            "Probed filesystem capabilities"
        );
        Ok(caps)
    }

    fn probe_in(dir: &Path, ntfs: bool) -> io::Result<Self> {
        let mut caps = Self::default();
        caps.windows_names |= ntfs;

        let mixed = dir.join("Probe.TMP");
        fs::write(&mixed, b"")?;
        caps.case_insensitive = dir.join("probe.tmp").exists();

        caps.symlinks = make_symlink(Path::new("Probe.TMP"), &dir.join("link.tmp")).is_ok();

        let unicode_name = "\u{00fc}nic\u{00f6}de-\u{30c6}\u{30b9}\u{30c8}.tmp";
        caps.unicode = fs::write(dir.join(unicode_name), b"").is_ok()
            && fs::read_dir(dir)?
                .filter_map(Result::ok)
                .any(|e| e.file_name().to_str() == Some(unicode_name));

        Ok(caps)
    }

    fn is_illegal(&self, c: char) -> bool {
        if c == '/' || c.is_ascii_control() {
            return true;
        }
        self.windows_names && matches!(c, ',' | '<' | '>' | ':' | '"' | '\\' | '|' | '?' | '*')
    }

    /// Sanitize one path component for this filesystem.
    ///
    /// Illegal characters become `_`, non-ASCII is dropped when unicode is
    /// unsupported, NTFS trailing dots and spaces are stripped, and the
    /// result is cut to `max_filename` bytes keeping the extension. The same
    /// input always produces the same output.
    pub fn valid_file_name(&self, name: &str) -> String {
        let mut clean: String = name
            .chars()
            .map(|c| if self.is_illegal(c) { '_' } else { c })
            .collect();
        if !self.unicode {
            clean = remove_unicode_chars(&clean);
        }
        if self.windows_names {
            clean.truncate(clean.trim_end_matches(&['.', ' '][..]).len());
        }
        if clean.is_empty() {
            clean.push('_');
        }
        truncate_keeping_extension(&clean, "", self.max_filename)
    }

    /// Insert `suffix` before the extension of an already valid name, cutting
    /// the stem so the result still fits in `max_filename`.
    pub fn with_suffix(&self, name: &str, suffix: &str) -> String {
        truncate_keeping_extension(name, suffix, self.max_filename)
    }

    /// Cut an already valid name so that `dir/name` fits in `max_path`.
    pub fn fit_in_path(&self, dir: &Path, name: &str) -> String {
        let used = dir.as_os_str().len() + 1;
        let budget = self
            .max_path
            .saturating_sub(used)
            .min(self.max_filename)
            .max(1);
        truncate_keeping_extension(name, "", budget)
    }

    /// Cut an already valid directory name so that `parent/name/` still leaves
    /// `reserve` bytes for the entries created inside it.
    pub fn fit_dir_in_path(&self, parent: &Path, name: &str, reserve: usize) -> String {
        let used = parent.as_os_str().len() + 2 + reserve;
        let budget = self
            .max_path
            .saturating_sub(used)
            .min(self.max_filename)
            .max(1);
        let mut cut = truncate_bytes(name, budget);
        if self.windows_names {
            cut = cut.trim_end_matches(&['.', ' '][..]);
        }
        if cut.is_empty() {
            "_".to_string()
        } else {
            cut.to_string()
        }
    }
}

/// Remove non-ASCII (unicode) characters, keeping only ASCII characters.
pub fn remove_unicode_chars(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii()).collect()
}

/// Cut `s` to at most `max` bytes on a char boundary.
pub fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn truncate_keeping_extension(name: &str, suffix: &str, max: usize) -> String {
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    let budget = max.saturating_sub(suffix.len() + ext.len());
    if budget == 0 {
        // Extension alone does not fit; treat the whole thing as the stem.
        let joined = format!("{stem}{suffix}{ext}");
        return truncate_bytes(&joined, max).to_string();
    }
    format!("{}{suffix}{ext}", truncate_bytes(stem, budget))
}

#[cfg(unix)]
pub(crate) fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
pub(crate) fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
