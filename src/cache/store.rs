//! Cache store backends

use crate::cache::snapshot::Snapshot;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Write-once/read-many memoization store shared across jobs and runs.
///
/// `put` is idempotent per key: the first writer wins and later writes
/// are no-ops, so concurrent writers race harmlessly. There is no
/// eviction. Always an injected dependency, never an ambient singleton,
/// so tests can substitute the in-memory backend.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up a key. A miss is `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<Snapshot>, CacheError>;

    /// Store a snapshot under a key unless the key already exists.
    async fn put(&self, key: &str, snapshot: Snapshot) -> Result<(), CacheError>;

    /// Check for a key without materializing the snapshot.
    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// In-memory store for tests and ephemeral runs
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, Snapshot>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Snapshot>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, snapshot: Snapshot) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.entry(key.to_string()).or_insert(snapshot);
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.read().await.contains_key(key))
    }
}

/// Directory-backed store persisting entries across runs.
///
/// Each entry lives under `<root>/<sha256(key)>/`. Writers stage into a
/// temporary sibling directory and rename into place; a rename onto an
/// existing entry fails, which resolves concurrent writers to
/// first-write-wins without corruption.
pub struct DirCacheStore {
    root: PathBuf,
}

impl DirCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_dir(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.root.join(format!("{:x}", digest))
    }
}

#[async_trait]
impl CacheStore for DirCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Snapshot>, CacheError> {
        let dir = self.entry_dir(key);
        if !dir.is_dir() {
            debug!(key, "cache miss");
            return Ok(None);
        }

        let mut snapshot = Snapshot::new();
        read_tree(&dir, &dir, &mut snapshot)?;
        debug!(key, files = snapshot.len(), "cache hit");
        Ok(Some(snapshot))
    }

    async fn put(&self, key: &str, snapshot: Snapshot) -> Result<(), CacheError> {
        let dir = self.entry_dir(key);
        if dir.exists() {
            debug!(key, "cache entry exists, keeping first write");
            return Ok(());
        }

        std::fs::create_dir_all(&self.root)?;
        let staging = self.root.join(format!(".staging-{}", Uuid::new_v4()));
        if let Err(err) = snapshot.restore(&staging) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(err.into());
        }

        match std::fs::rename(&staging, &dir) {
            Ok(()) => {
                debug!(key, files = snapshot.len(), "cache entry saved");
                Ok(())
            }
            Err(_) if dir.exists() => {
                // Lost the race to another writer
                let _ = std::fs::remove_dir_all(&staging);
                Ok(())
            }
            Err(err) => {
                let _ = std::fs::remove_dir_all(&staging);
                Err(err.into())
            }
        }
    }

    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entry_dir(key).is_dir())
    }
}

fn read_tree(root: &Path, dir: &Path, snapshot: &mut Snapshot) -> Result<(), CacheError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            read_tree(root, &path, snapshot)?;
        } else if path.is_file() {
            if let Ok(relative) = path.strip_prefix(root) {
                snapshot.insert(relative.to_path_buf(), std::fs::read(&path)?);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_of(name: &str, contents: &str) -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.insert(PathBuf::from(name), contents.as_bytes().to_vec());
        snapshot
    }

    #[tokio::test]
    async fn test_in_memory_first_write_wins() {
        let store = InMemoryCacheStore::new();
        store.put("k", snapshot_of("f", "v1")).await.unwrap();
        store.put("k", snapshot_of("f", "v2")).await.unwrap();

        let loaded = store.get("k").await.unwrap().unwrap();
        assert_eq!(loaded, snapshot_of("f", "v1"));
    }

    #[tokio::test]
    async fn test_in_memory_miss_is_none() {
        let store = InMemoryCacheStore::new();
        assert!(store.get("absent").await.unwrap().is_none());
        assert!(!store.contains("absent").await.unwrap());
    }

    #[tokio::test]
    async fn test_dir_store_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let store = DirCacheStore::new(root.path());

        store
            .put("deps-abc", snapshot_of("deps/a.txt", "alpha"))
            .await
            .unwrap();

        assert!(store.contains("deps-abc").await.unwrap());
        let loaded = store.get("deps-abc").await.unwrap().unwrap();
        assert_eq!(loaded, snapshot_of("deps/a.txt", "alpha"));
    }

    #[tokio::test]
    async fn test_dir_store_first_write_wins() {
        let root = tempfile::tempdir().unwrap();
        let store = DirCacheStore::new(root.path());

        store.put("k", snapshot_of("f", "v1")).await.unwrap();
        store.put("k", snapshot_of("f", "v2")).await.unwrap();

        let loaded = store.get("k").await.unwrap().unwrap();
        assert_eq!(loaded, snapshot_of("f", "v1"));
    }

    #[tokio::test]
    async fn test_dir_store_persists_across_instances() {
        let root = tempfile::tempdir().unwrap();
        {
            let store = DirCacheStore::new(root.path());
            store.put("k", snapshot_of("f", "kept")).await.unwrap();
        }

        let reopened = DirCacheStore::new(root.path());
        assert!(reopened.contains("k").await.unwrap());
    }
}
