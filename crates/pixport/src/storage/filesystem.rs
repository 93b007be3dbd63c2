use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::StorageError;
use crate::storage::{ObjectStore, StoredObject};

/// Filesystem-backed object store: artifacts land under a root directory
/// and are published at `{public_base}/{key}`.
pub struct FsObjectStore {
    root: PathBuf,
    public_base: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, key: &str, artifact: &Path) -> Result<StoredObject, StorageError> {
        let content = std::fs::read(artifact).map_err(|e| StorageError::ReadArtifact {
            path: artifact.to_path_buf(),
            source: e,
        })?;

        let destination = self.root.join(key);
        if let Some(parent) = destination.parent() {
            self.ensure_directory(parent)?;
        }

        // Exclusive creation: a key is written once, a repeat upload is an
        // error rather than a silent overwrite.
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&destination)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StorageError::ObjectExists(destination.clone())
                } else {
                    StorageError::WriteObject {
                        path: destination.clone(),
                        source: e,
                    }
                }
            })?;
        file.write_all(&content)
            .map_err(|e| StorageError::WriteObject {
                path: destination.clone(),
                source: e,
            })?;

        let content_type = mime_guess::from_path(key).first().map(|m| m.to_string());
        debug!(
            "stored '{}' ({} bytes, {:?})",
            destination.display(),
            content.len(),
            content_type
        );

        Ok(StoredObject {
            key: key.to_string(),
            access_url: format!("{}/{}", self.public_base, key),
            content_type,
            bytes: content.len() as u64,
        })
    }
}
