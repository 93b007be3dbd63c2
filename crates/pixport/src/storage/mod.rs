pub mod filesystem;

use std::path::Path;

pub use filesystem::FsObjectStore;

use crate::error::StorageError;

/// Where an uploaded artifact landed.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub access_url: String,
    pub content_type: Option<String>,
    pub bytes: u64,
}

/// Upload target for converted artifacts.
pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, artifact: &Path) -> Result<StoredObject, StorageError>;
}

/// Normalizes an item identifier into an object key: characters outside
/// `[A-Za-z0-9._-]` become hyphens, and the artifact extension is appended.
pub fn object_key(item_id: &str, extension: &str) -> String {
    let safe: String = item_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{}.{}", safe, extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_passes_safe_characters() {
        assert_eq!(object_key("ark-001_a", "jp2"), "ark-001_a.jp2");
    }

    #[test]
    fn test_object_key_replaces_unsafe_characters() {
        assert_eq!(object_key("ark:/21198/zz01", "jp2"), "ark--21198-zz01.jp2");
        assert_eq!(object_key("a b", "jp2"), "a-b.jp2");
    }
}
