//! Filesystem [`BlobStore`].
//!
//! Keys map onto relative paths under the configured root. Writes go
//! through a temp file and rename so a crashed write never leaves a
//! truncated blob behind.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use docvault_core::store::BlobStore;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        // Keys are engine-generated ("documents/<uuid>", "chunks/<uuid>.json"),
        // but reject traversal anyway.
        if key.split('/').any(|part| part == ".." || part.is_empty()) {
            anyhow::bail!("Invalid blob key: '{}'", key);
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write blob {}", key))?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put("documents/abc", b"hello").await.unwrap();
        assert_eq!(store.get("documents/abc").await.unwrap(), Some(b"hello".to_vec()));

        store.delete("documents/abc").await.unwrap();
        assert_eq!(store.get("documents/abc").await.unwrap(), None);
        // Deleting a missing key is a no-op.
        store.delete("documents/abc").await.unwrap();
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.put("../escape", b"x").await.is_err());
        assert!(store.get("a//b").await.is_err());
    }
}
