//! Blob storage addressed by `(bucket, key)`.
//!
//! Buckets are knowledge base ids (or, for converted files, the parent
//! folder id of the source file). `FsBlobStore` keeps one directory per
//! bucket under the configured root.

use std::io::ErrorKind;
use std::path::PathBuf;

use bytes::Bytes;
use tracing::debug;

use crate::error::StorageError;

pub trait BlobStore: Send + Sync {
    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError>;

    fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError>;

    /// Remove an object. Removing a missing object succeeds.
    fn remove(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    fn health(&self) -> Result<(), StorageError>;
}

/// Local filesystem blob store
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        if !is_safe_segment(bucket) || !is_safe_segment(key) {
            return Err(StorageError::InvalidKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(self.root.join(bucket).join(key))
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}

fn io_error(bucket: &str, key: &str, source: std::io::Error) -> StorageError {
    StorageError::Io {
        bucket: bucket.to_string(),
        key: key.to_string(),
        source,
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(bucket, key, e))?;
        }
        std::fs::write(&path, data).map_err(|e| io_error(bucket, key, e))?;
        debug!(bucket = %bucket, key = %key, size = data.len(), "Stored blob");
        Ok(())
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let path = self.object_path(bucket, key)?;
        match std::fs::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(io_error(bucket, key, e)),
        }
    }

    fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(bucket, key)?;
        path.try_exists().map_err(|e| io_error(bucket, key, e))
    }

    fn remove(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(bucket = %bucket, key = %key, "Removed blob");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(bucket, key, e)),
        }
    }

    fn health(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.root).map_err(|e| io_error("", "", e))?;
        let probe = self.root.join(".health");
        std::fs::write(&probe, b"ok").map_err(|e| io_error("", ".health", e))?;
        std::fs::remove_file(&probe).map_err(|e| io_error("", ".health", e))?;
        Ok(())
    }
}
