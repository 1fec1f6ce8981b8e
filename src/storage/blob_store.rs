use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::replication::types::ContentId;
use crate::util::errors::{ReplicationError, Result};

/// Content-addressable storage for committed payloads
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data`, returning the id it can be fetched back with
    async fn add(&self, data: Vec<u8>, name: &str) -> Result<ContentId>;

    async fn get(&self, content_id: &str) -> Result<Vec<u8>>;
}

/// Directory-backed store keyed by the SHA-256 of the payload
pub struct FsBlobStore {
    data_dir: PathBuf,
}

impl FsBlobStore {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        // Create data directory if it doesn't exist
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn content_id(data: &[u8]) -> ContentId {
        format!("sha256-{:x}", Sha256::digest(data))
    }

    fn blob_path(&self, content_id: &str) -> Result<PathBuf> {
        let valid = content_id
            .strip_prefix("sha256-")
            .is_some_and(|hex| hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()));
        if !valid {
            return Err(ReplicationError::BlobStore(format!(
                "not a content id: {content_id}"
            )));
        }
        Ok(self.data_dir.join(content_id))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn add(&self, data: Vec<u8>, name: &str) -> Result<ContentId> {
        let content_id = Self::content_id(&data);
        let path = self.blob_path(&content_id)?;

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            // Write then rename so a reader never sees a partial blob
            let tmp = path.with_extension("tmp");
            tokio::fs::write(&tmp, &data)
                .await
                .map_err(|e| ReplicationError::BlobStore(e.to_string()))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .map_err(|e| ReplicationError::BlobStore(e.to_string()))?;
        }

        tracing::info!("Stored {} ({} bytes) as {}", name, data.len(), content_id);
        Ok(content_id)
    }

    async fn get(&self, content_id: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(content_id)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| ReplicationError::BlobStore(format!("{content_id}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_add_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp_dir.path().to_path_buf()).unwrap();

        let cid = store.add(b"hello".to_vec(), "a.txt").await.unwrap();
        assert_eq!(
            cid,
            "sha256-2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(store.get(&cid).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_same_bytes_same_id() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp_dir.path().to_path_buf()).unwrap();

        let a = store.add(b"x".to_vec(), "a").await.unwrap();
        let b = store.add(b"x".to_vec(), "b").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_rejects_foreign_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp_dir.path().to_path_buf()).unwrap();

        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.get("QmYwAPJzv5CZsnA").await.is_err());
    }
}
