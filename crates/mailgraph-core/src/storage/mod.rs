/// Content-addressed blob storage
use crate::error::MailgraphError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// SHA-256 over raw bytes, hex-encoded; the identity of a Document within
/// a user
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[async_trait]
pub trait StorageService: Send + Sync {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), MailgraphError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, MailgraphError>;
    async fn exists(&self, key: &str) -> Result<bool, MailgraphError>;
    async fn delete(&self, key: &str) -> Result<(), MailgraphError>;
}

/// Filesystem blob store, keyed by content hash with two-level sharding so
/// a single directory never accumulates every blob
pub struct FsStorageService {
    root: PathBuf,
}

impl FsStorageService {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, MailgraphError> {
        if key.len() < 3 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MailgraphError::Validation(format!(
                "Invalid storage key: {}",
                key
            )));
        }
        Ok(self.root.join(&key[..2]).join(&key[2..]))
    }
}

#[async_trait]
impl StorageService for FsStorageService {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), MailgraphError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so readers never observe a partial blob
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(key = %key, size = data.len(), "Stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, MailgraphError> {
        let path = self.path_for(key)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| MailgraphError::Storage(format!("Blob read failed for {}: {}", key, e)))?;
        Ok(data)
    }

    async fn exists(&self, key: &str) -> Result<bool, MailgraphError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), MailgraphError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MailgraphError::Storage(format!(
                "Blob delete failed for {}: {}",
                key, e
            ))),
        }
    }
}

/// In-memory blob store for tests
pub struct InMemoryStorageService {
    blobs: tokio::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl InMemoryStorageService {
    pub fn new() -> Self {
        Self {
            blobs: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryStorageService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageService for InMemoryStorageService {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), MailgraphError> {
        self.blobs
            .lock()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, MailgraphError> {
        self.blobs
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| MailgraphError::Storage(format!("No blob for key {}", key)))
    }

    async fn exists(&self, key: &str) -> Result<bool, MailgraphError> {
        Ok(self.blobs.lock().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), MailgraphError> {
        self.blobs.lock().await.remove(key);
        Ok(())
    }
}
