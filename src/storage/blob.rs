//! Filesystem blob store.
//!
//! Objects are stored one file per key:
//! ```text
//! {root}/
//! ├── user_files/
//! │   └── {owner}/
//! │       └── 5f0c...-report.pdf
//! ├── temporary_storage/
//! │   └── {owner}/...
//! └── profile_images/
//!     └── {owner}/profile
//! ```

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::traits::{BlobStore, KeyFailure, RemoveManyOutcome};
use crate::{Result, StowError};

/// Blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a new store with the given root directory.
    ///
    /// The root directory will be created if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        Ok(Self { root })
    }

    /// Get the root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the path of an object.
    ///
    /// Buckets must be a single path segment and keys must be relative paths
    /// without `.` or `..` segments.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        if !is_plain_relative(bucket) || bucket.contains('/') {
            return Err(StowError::Blob(format!("invalid bucket name: {bucket}")));
        }
        if !is_plain_relative(key) {
            return Err(StowError::Blob(format!("invalid object key: {key}")));
        }

        Ok(self.root.join(bucket).join(key))
    }

    /// Check if an object exists.
    pub async fn exists(&self, bucket: &str, key: &str) -> bool {
        match self.object_path(bucket, key) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Load an object's content.
    pub async fn load(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;

        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StowError::NotFound(format!("object {bucket}/{key}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn is_plain_relative(value: &str) -> bool {
    if value.is_empty() || value.contains('\\') {
        return false;
    }
    Path::new(value)
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        let path = self.object_path(bucket, key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;

        debug!(bucket, key, bytes = data.len(), "Stored object");
        Ok(())
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<bool> {
        let path = self.object_path(bucket, key)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StowError::Blob(format!("failed to remove {bucket}/{key}: {e}"))),
        }
    }

    async fn remove_many(&self, bucket: &str, keys: &[String]) -> Result<RemoveManyOutcome> {
        let mut outcome = RemoveManyOutcome::default();

        for key in keys {
            match self.remove(bucket, key).await {
                Ok(true) => outcome.removed += 1,
                Ok(false) => outcome.missing += 1,
                Err(e) => outcome.failures.push(KeyFailure {
                    key: key.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (FsBlobStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp_dir.path().join("blobs")).unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_load_remove() {
        let (store, _temp_dir) = create_test_store();

        store.put("user_files", "owner/a.txt", b"hello").await.unwrap();
        assert!(store.exists("user_files", "owner/a.txt").await);
        assert_eq!(store.load("user_files", "owner/a.txt").await.unwrap(), b"hello");

        assert!(store.remove("user_files", "owner/a.txt").await.unwrap());
        assert!(!store.exists("user_files", "owner/a.txt").await);
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_error() {
        let (store, _temp_dir) = create_test_store();
        assert!(!store.remove("user_files", "owner/none").await.unwrap());
    }

    #[tokio::test]
    async fn test_load_missing() {
        let (store, _temp_dir) = create_test_store();
        let result = store.load("user_files", "owner/none").await;
        assert!(matches!(result, Err(StowError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_many_counts() {
        let (store, _temp_dir) = create_test_store();
        store.put("b", "o/1", b"1").await.unwrap();
        store.put("b", "o/2", b"2").await.unwrap();

        let keys = vec![
            "o/1".to_string(),
            "o/2".to_string(),
            "o/3".to_string(),
            "../escape".to_string(),
        ];
        let outcome = store.remove_many("b", &keys).await.unwrap();

        assert_eq!(outcome.removed, 2);
        assert_eq!(outcome.missing, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].key, "../escape");
    }

    #[test]
    fn test_object_path_rejects_traversal() {
        let (store, _temp_dir) = create_test_store();

        assert!(store.object_path("bucket", "../x").is_err());
        assert!(store.object_path("bucket", "a/../../x").is_err());
        assert!(store.object_path("bucket", "/etc/passwd").is_err());
        assert!(store.object_path("bucket", "a\\b").is_err());
        assert!(store.object_path("bucket", "").is_err());
        assert!(store.object_path("..", "x").is_err());
        assert!(store.object_path("a/b", "x").is_err());

        let path = store.object_path("bucket", "owner/file.txt").unwrap();
        assert!(path.ends_with("bucket/owner/file.txt"));
    }
}
