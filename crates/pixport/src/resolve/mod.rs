//! Source-path prefix policies.
//!
//! A manifest declares bare file names; the files live under a mount point
//! whose layout varies by deployment. The policy that maps a file name to
//! its directory prefix is injected into ingestion rather than looked up by
//! name at runtime.

use std::sync::LazyLock;

use regex::Regex;

/// Maps a declared file name to the path segment it lives under.
///
/// Returns `None` when no prefix can be determined for the name; the item
/// is then reported as missing.
pub trait PrefixResolver: Send + Sync {
    fn resolve_prefix(&self, file_name: &str) -> Option<String>;
}

/// Every file lives under one constant directory.
pub struct FixedPrefix {
    prefix: String,
}

impl FixedPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl PrefixResolver for FixedPrefix {
    fn resolve_prefix(&self, _file_name: &str) -> Option<String> {
        Some(self.prefix.clone())
    }
}

// Shelf convention: the first two delimited name segments are directories,
// e.g. "uclamss_2212_b107_f03.tif" lives under "uclamss/2212".
static RE_SHELF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([a-z0-9]+)[._-]([a-z0-9]+)[._-]").unwrap());

/// Derives the directory prefix from the file name itself.
pub struct ConventionPrefix;

impl ConventionPrefix {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConventionPrefix {
    fn default() -> Self {
        Self::new()
    }
}

impl PrefixResolver for ConventionPrefix {
    fn resolve_prefix(&self, file_name: &str) -> Option<String> {
        let caps = RE_SHELF.captures(file_name)?;
        Some(format!(
            "{}/{}",
            caps[1].to_ascii_lowercase(),
            caps[2].to_ascii_lowercase()
        ))
    }
}
