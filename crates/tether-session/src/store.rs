//! Storage backends for the primary cache and the durable mirror.
//!
//! Two traits model the two storage media: [`KeyValueStore`] is synchronous
//! (the fast webview-style store the auth library writes to) and
//! [`DurableStore`] is asynchronous (native secure storage that survives the
//! primary store being cleared). They stay separate even when both are backed
//! by the same directory, because the primary store must be readable without
//! an await point.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;

/// Synchronous string key-value store.
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Read a value. `Ok(None)` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite a value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Deleting an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Asynchronous, independently durable string key-value store.
#[async_trait]
pub trait DurableStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Shared primary store.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Shared durable store.
pub type SharedDurableStore = Arc<dyn DurableStore>;

// ============================================================================
// In-memory backends
// ============================================================================

/// In-memory primary store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// In-memory durable store with optional simulated latency.
///
/// The latency models a native storage bridge that is slow (or suspended)
/// right after the app resumes.
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    values: RwLock<HashMap<String, String>>,
    latency: RwLock<Option<Duration>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.write() = Some(latency);
        self
    }

    /// Change the simulated latency.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    async fn delay(&self) {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.delay().await;
        Ok(self.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.delay().await;
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.delay().await;
        self.values.write().remove(key);
        Ok(())
    }
}

// ============================================================================
// File backends
// ============================================================================

/// Map a key to a file name inside `dir`.
fn key_path(dir: &Path, key: &str) -> PathBuf {
    let name: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{}.json", name))
}

/// File-backed primary store: one file per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(key_path(&self.dir, key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = key_path(&self.dir, key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(key_path(&self.dir, key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// File-backed durable store using async filesystem calls.
#[derive(Debug, Clone)]
pub struct FileDurableStore {
    dir: PathBuf,
}

impl FileDurableStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DurableStore for FileDurableStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(key_path(&self.dir, key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = key_path(&self.dir, key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(key_path(&self.dir, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_file_store_sanitizes_keys() {
        let temp = tempdir().unwrap();
        let store = FileStore::new(temp.path());
        store.set("sb-abc/auth token", "{}").unwrap();
        assert!(temp.path().join("sb-abc_auth_token.json").exists());
        assert_eq!(store.get("sb-abc/auth token").unwrap().as_deref(), Some("{}"));
        store.remove("sb-abc/auth token").unwrap();
        assert_eq!(store.get("sb-abc/auth token").unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_durable_store() {
        let temp = tempdir().unwrap();
        let store = FileDurableStore::new(temp.path().join("mirror"));
        assert_eq!(store.get("authTokenMirror").await.unwrap(), None);
        store.set("authTokenMirror", "blob").await.unwrap();
        assert_eq!(
            store.get("authTokenMirror").await.unwrap().as_deref(),
            Some("blob")
        );
        store.remove("authTokenMirror").await.unwrap();
        store.remove("authTokenMirror").await.unwrap();
        assert_eq!(store.get("authTokenMirror").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_durable_store_latency() {
        let store = MemoryDurableStore::new().with_latency(Duration::from_millis(300));
        let started = tokio::time::Instant::now();
        store.set("k", "v").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
