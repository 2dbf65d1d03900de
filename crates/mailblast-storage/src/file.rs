//! Blob storage abstraction
//!
//! Attachments, signature images and profile photos live in named buckets.
//! Callers address objects either by `bucket/path` or by the public URL
//! returned from [`BlobStore::upload`].

use async_trait::async_trait;
use mailblast_common::config::StorageConfig;
use mailblast_common::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Blob storage trait
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store an object and return its public URL
    async fn upload(&self, bucket: &str, path: &str, data: &[u8]) -> Result<String>;

    /// Public URL of an object, whether or not it exists
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Delete objects; missing objects are ignored
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()>;

    /// Read an object
    async fn read(&self, bucket: &str, path: &str) -> Result<Vec<u8>>;

    /// Map a stored reference to `(bucket, path)`.
    ///
    /// Absolute URLs that do not belong to this store yield `None`.
    fn locate(&self, reference: &str) -> Option<(String, String)> {
        if reference.contains("://") {
            return None;
        }
        split_reference(reference)
    }
}

fn split_reference(reference: &str) -> Option<(String, String)> {
    let (bucket, path) = reference.trim_start_matches('/').split_once('/')?;
    if bucket.is_empty() || path.is_empty() {
        return None;
    }
    Some((bucket.to_string(), path.to_string()))
}

/// Local filesystem blob store
pub struct LocalBlobStore {
    base_path: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    /// Create a new local store from config
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Self::from_path(&config.path, &config.public_base_url)
    }

    /// Create a new local store rooted at a path
    pub fn from_path(path: &Path, public_base_url: &str) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), "Initialized local blob storage");

        Ok(Self {
            base_path: path.to_path_buf(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Full path for an object, with path traversal protection
    fn full_path(&self, bucket: &str, path: &str) -> Result<PathBuf> {
        for part in [bucket, path] {
            if part.contains("..") {
                return Err(Error::Storage(
                    "Path traversal detected: '..' is not allowed".to_string(),
                ));
            }
            if part.starts_with('/') || part.starts_with('\\') {
                return Err(Error::Storage(
                    "Absolute paths are not allowed".to_string(),
                ));
            }
        }
        if bucket.is_empty() || bucket.contains('/') {
            return Err(Error::Storage(format!("Invalid bucket name: {:?}", bucket)));
        }

        let full = self.base_path.join(bucket).join(path);
        if !full.starts_with(&self.base_path) {
            return Err(Error::Storage(
                "Path traversal detected: resolved path is outside storage directory".to_string(),
            ));
        }

        Ok(full)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, bucket: &str, path: &str, data: &[u8]) -> Result<String> {
        let full_path = self.full_path(bucket, path)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let mut file = fs::File::create(&full_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create file: {}", e)))?;

        file.write_all(data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write file: {}", e)))?;

        file.sync_all()
            .await
            .map_err(|e| Error::Storage(format!("Failed to sync file: {}", e)))?;

        debug!(bucket, path, size = data.len(), "Stored blob");

        Ok(self.public_url(bucket, path))
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()> {
        for path in paths {
            let full_path = self.full_path(bucket, path)?;
            match fs::remove_file(&full_path).await {
                Ok(()) => debug!(bucket, path = %path, "Deleted blob"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(bucket, path = %path, "Blob already absent");
                }
                Err(e) => {
                    return Err(Error::Storage(format!("Failed to delete file: {}", e)));
                }
            }
        }
        Ok(())
    }

    async fn read(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(bucket, path)?;

        fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("{}/{}", bucket, path))
            } else {
                Error::Storage(format!("Failed to read file: {}", e))
            }
        })
    }

    fn locate(&self, reference: &str) -> Option<(String, String)> {
        if let Some(rest) = reference.strip_prefix(&self.public_base_url) {
            return split_reference(rest);
        }
        if reference.contains("://") {
            return None;
        }
        split_reference(reference)
    }
}
