//! Local key-value storage for session data.
//!
//! The host app caches the signed-in user, role, course list and bearer
//! token under well-known keys. This crate only reads them.
//!
//! Two backends:
//! - [`FileStore`]: one JSON file per key in the platform config directory:
//!   - Linux: `~/.config/pizarra/`
//!   - macOS: `~/Library/Application Support/pizarra/`
//!   - Windows: `%APPDATA%\pizarra\`
//! - [`MemoryStore`]: process-local map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Raw string storage keyed by name.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a raw value. Missing keys and I/O failures both yield `None`.
    async fn get(&self, key: &str) -> Option<String>;

    /// Write a raw value. Returns `true` if the operation succeeded.
    async fn set(&self, key: &str, value: &str) -> bool;

    /// Remove a value.
    async fn remove(&self, key: &str);
}

/// Load a JSON value.
///
/// Returns `None` if the key doesn't exist or deserialization fails.
pub async fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let json = store.get(key).await?;
    serde_json::from_str(&json).ok()
}

/// File-backed store, one `<key>.json` per entry.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at `<config dir>/pizarra`.
    pub fn default_location() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        Some(Self::new(config_dir.join("pizarra")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{}.json", safe_key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Option<String> {
        tokio::fs::read_to_string(self.file_path(key)).await.ok()
    }

    async fn set(&self, key: &str, value: &str) -> bool {
        if tokio::fs::create_dir_all(&self.dir).await.is_err() {
            return false;
        }
        tokio::fs::write(self.file_path(key), value).await.is_ok()
    }

    async fn remove(&self, key: &str) {
        let _ = tokio::fs::remove_file(self.file_path(key)).await;
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    async fn set(&self, key: &str, value: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        true
    }

    async fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }
}
