//! Key-addressed binary storage for post images.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BlobError {
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    QuotaExceeded { size: usize, limit: usize },

    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    #[error("blob store unreachable: {0}")]
    Network(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return the URL it can be fetched from.
    async fn upload(&self, key: &str, bytes: Bytes) -> Result<String, BlobError>;
}

/// Blob store writing under a directory on disk and serving from a URL prefix.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    url_prefix: String,
    max_bytes: usize,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: &str, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
            max_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path inside the root, refusing anything that escapes it.
    pub fn resolve(&self, key: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    pub async fn read(&self, key: &str) -> Result<Option<Bytes>, BlobError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BlobError::Network(e.to_string())),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, key: &str, bytes: Bytes) -> Result<String, BlobError> {
        if bytes.len() > self.max_bytes {
            return Err(BlobError::QuotaExceeded {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::Network(e.to_string()))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| BlobError::Network(e.to_string()))?;

        tracing::info!("Stored blob {} ({} bytes)", key, bytes.len());
        Ok(format!("{}/{}", self.url_prefix, key))
    }
}

/// Build a blob key for an uploaded image, keeping only a safe file name.
pub fn image_key(file_name: &str) -> String {
    let name: String = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let name = name.trim_start_matches('.');
    let name = if name.is_empty() { "image" } else { name };
    format!("images/{}-{}", uuid::Uuid::now_v7(), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_writes_file_and_returns_url() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(tmp.path(), "/uploads/", 1024);

        let url = store
            .upload("images/a.png", Bytes::from_static(b"png"))
            .await
            .unwrap();
        assert_eq!(url, "/uploads/images/a.png");
        assert_eq!(
            store.read("images/a.png").await.unwrap(),
            Some(Bytes::from_static(b"png"))
        );
    }

    #[tokio::test]
    async fn oversized_upload_is_quota_exceeded() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(tmp.path(), "/uploads", 2);
        let err = store
            .upload("images/a.png", Bytes::from_static(b"toolong"))
            .await
            .unwrap_err();
        assert_eq!(err, BlobError::QuotaExceeded { size: 7, limit: 2 });
    }

    #[test]
    fn resolve_rejects_traversal() {
        let store = FsBlobStore::new("/tmp/blobs", "/uploads", 10);
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
        assert!(store.resolve("").is_err());
        assert!(store.resolve("images/ok.png").is_ok());
    }

    #[tokio::test]
    async fn read_missing_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(tmp.path(), "/uploads", 10);
        assert_eq!(store.read("images/none.png").await.unwrap(), None);
    }

    #[test]
    fn image_key_strips_paths_and_odd_characters() {
        let key = image_key("C:\\photos\\my cat!.png");
        assert!(key.starts_with("images/"));
        assert!(key.ends_with("-mycat.png"));

        let key = image_key("../../");
        assert!(key.ends_with("-image"));
    }
}
