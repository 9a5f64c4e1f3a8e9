//! Object store port: opaque blob upload for snapshot artifacts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{LatticeError, LatticeResult};

/// Port over the blob store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload (upsert) a blob at the given path.
    async fn upload(&self, path: &str, bytes: &[u8]) -> LatticeResult<()>;

    /// Read a blob back (verification, tests).
    async fn download(&self, path: &str) -> LatticeResult<Vec<u8>>;

    /// Produce a presigned download URL valid for `ttl`.
    async fn presign_download(&self, path: &str, ttl: Duration) -> LatticeResult<String>;

    /// Whether a blob exists at the path.
    async fn exists(&self, path: &str) -> LatticeResult<bool>;
}

// ---------------------------------------------------------------------------
// In-memory fake
// ---------------------------------------------------------------------------

/// Hermetic in-memory blob store.
#[derive(Default)]
pub struct MemoryObjectStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, path: &str, bytes: &[u8]) -> LatticeResult<()> {
        self.blobs.write().insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn download(&self, path: &str) -> LatticeResult<Vec<u8>> {
        self.blobs
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| LatticeError::Internal(format!("blob not found: {path}")))
    }

    async fn presign_download(&self, path: &str, ttl: Duration) -> LatticeResult<String> {
        if !self.exists(path).await? {
            return Err(LatticeError::Internal(format!("blob not found: {path}")));
        }
        Ok(format!("memory://{path}?ttl={}", ttl.as_secs()))
    }

    async fn exists(&self, path: &str) -> LatticeResult<bool> {
        Ok(self.blobs.read().contains_key(path))
    }
}

// ---------------------------------------------------------------------------
// Filesystem adapter
// ---------------------------------------------------------------------------

/// Blob store adapter over a local directory tree.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> LatticeResult<PathBuf> {
        // Object paths are forward-slash keys, never absolute.
        if path.starts_with('/') || path.contains("..") {
            return Err(LatticeError::Internal(format!("invalid object path: {path}")));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload(&self, path: &str, bytes: &[u8]) -> LatticeResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write to a temp sibling then rename so readers never observe a
        // partial blob.
        let tmp = full.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &full).await?;
        Ok(())
    }

    async fn download(&self, path: &str) -> LatticeResult<Vec<u8>> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::read(&full).await?)
    }

    async fn presign_download(&self, path: &str, _ttl: Duration) -> LatticeResult<String> {
        let full = self.resolve(path)?;
        if !full.exists() {
            return Err(LatticeError::Internal(format!("blob not found: {path}")));
        }
        Ok(format!("file://{}", full.display()))
    }

    async fn exists(&self, path: &str) -> LatticeResult<bool> {
        Ok(self.resolve(path)?.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let store = MemoryObjectStore::new();
        store.upload("o1/r1.msgpack", b"bytes").await.expect("upload");
        assert!(store.exists("o1/r1.msgpack").await.expect("exists"));
        assert_eq!(store.download("o1/r1.msgpack").await.expect("download"), b"bytes");
    }

    #[tokio::test]
    async fn test_fs_roundtrip_and_overwrite() {
        let dir = tempfile::tempdir().expect("tmp");
        let store = FsObjectStore::new(dir.path());
        store.upload("o1/r1.msgpack", b"v1").await.expect("upload");
        store.upload("o1/r1.msgpack", b"v2").await.expect("overwrite");
        assert_eq!(store.download("o1/r1.msgpack").await.expect("download"), b"v2");
    }

    #[tokio::test]
    async fn test_fs_rejects_traversal() {
        let dir = tempfile::tempdir().expect("tmp");
        let store = FsObjectStore::new(dir.path());
        assert!(store.upload("../escape", b"x").await.is_err());
        assert!(store.upload("/abs", b"x").await.is_err());
    }
}
