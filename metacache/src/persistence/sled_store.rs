use crate::domain::{CacheEntry, MediaKey};
use crate::ports::CacheStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{Error, Result};
use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;

const ENTRIES_TREE: &str = "metadata_entries";

/// Sled-backed persistent cache store.
///
/// Entries are JSON documents keyed by [`MediaKey::storage_key`], so the tree
/// holds at most one entry per key. Nothing is removed unless retention runs.
///
/// `find` and `upsert` run the sled call on the blocking pool, so a caller's
/// deadline can give up on a slow disk. The retention helpers are synchronous
/// and are meant for `spawn_blocking` too.
pub struct SledCacheStore<V> {
    db: sled::Db,
    entries: sled::Tree,
    _marker: PhantomData<fn() -> V>,
}

/// Just the timestamp of an entry, for retention scans.
#[derive(serde::Deserialize)]
struct Stamp {
    last_updated: DateTime<Utc>,
}

impl<V> SledCacheStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open (or create) a store. Creates the parent directory if it doesn't exist
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let db = sled::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open Sled database: {}", e)))?;
        let entries = db
            .open_tree(ENTRIES_TREE)
            .map_err(|e| Error::Storage(format!("Failed to open entries tree: {}", e)))?;

        Ok(Self {
            db,
            entries,
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn decode(bytes: &[u8]) -> Result<CacheEntry<V>> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize entry: {}", e)))
    }

    fn stamps(&self) -> Result<Vec<(sled::IVec, DateTime<Utc>)>> {
        let mut stamps = Vec::with_capacity(self.entries.len());
        for item in self.entries.iter() {
            let (key, value) = item
                .map_err(|e| Error::Storage(format!("Failed to iterate entries: {}", e)))?;
            match serde_json::from_slice::<Stamp>(&value) {
                Ok(stamp) => stamps.push((key, stamp.last_updated)),
                // Undecodable entries sort first and go first.
                Err(_) => stamps.push((key, DateTime::<Utc>::MIN_UTC)),
            }
        }
        Ok(stamps)
    }

    fn remove_all(&self, keys: impl IntoIterator<Item = sled::IVec>) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self
                .entries
                .remove(key)
                .map_err(|e| Error::Storage(format!("Failed to remove entry: {}", e)))?
                .is_some()
            {
                removed += 1;
            }
        }
        if removed > 0 {
            self.db
                .flush()
                .map_err(|e| Error::Storage(format!("Failed to flush database: {}", e)))?;
        }
        Ok(removed)
    }

    /// Remove entries last updated longer than `max_age` ago.
    pub fn sweep_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let expired = self
            .stamps()?
            .into_iter()
            .filter(|(_, updated)| *updated < cutoff)
            .map(|(key, _)| key);
        self.remove_all(expired)
    }

    /// Remove the oldest entries until at most `max_entries` remain.
    pub fn enforce_capacity(&self, max_entries: usize) -> Result<usize> {
        if self.entries.len() <= max_entries {
            return Ok(0);
        }

        let mut stamps = self.stamps()?;
        stamps.sort_by_key(|(_, updated)| *updated);
        let excess = stamps.len().saturating_sub(max_entries);
        self.remove_all(stamps.into_iter().take(excess).map(|(key, _)| key))
    }
}

#[async_trait]
impl<V> CacheStore<V> for SledCacheStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn find(&self, key: &MediaKey) -> Result<Option<CacheEntry<V>>> {
        let entries = self.entries.clone();
        let storage_key = key.storage_key();

        let value = tokio::task::spawn_blocking(move || entries.get(storage_key.as_bytes()))
            .await
            .map_err(|e| Error::Internal(format!("Sled read task failed: {}", e)))?
            .map_err(|e| Error::Storage(format!("Failed to get entry: {}", e)))?;

        value.map(|bytes| Self::decode(&bytes)).transpose()
    }

    async fn upsert(&self, key: MediaKey, data: V) -> Result<()> {
        let storage_key = key.storage_key();
        let value = serde_json::to_vec(&CacheEntry::new(key, data))
            .map_err(|e| Error::Serialization(format!("Failed to serialize entry: {}", e)))?;
        let entries = self.entries.clone();

        tokio::task::spawn_blocking(move || entries.insert(storage_key.as_bytes(), value))
            .await
            .map_err(|e| Error::Internal(format!("Sled write task failed: {}", e)))?
            .map_err(|e| Error::Storage(format!("Failed to save entry: {}", e)))?;

        Ok(())
    }
}

impl<V> std::fmt::Debug for SledCacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledCacheStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}
