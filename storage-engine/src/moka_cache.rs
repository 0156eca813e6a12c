use async_trait::async_trait;
use metacache::domain::{CacheEntry, MediaKey};
use metacache::ports::CacheStore;
use moka::future::Cache;
use shared::Result;
use std::fmt::Debug;
use std::time::Duration;

/// Moka-based metadata store with a capacity bound and optional TTL.
/// Eviction is TinyLFU once `max_entries` is reached.
pub struct MokaCacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    cache: Cache<MediaKey, CacheEntry<V>>,
}

impl<V> MokaCacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new bounded Moka store with max entries and optional TTL
    pub fn new_bounded(max_entries: u64, ttl: Option<Duration>) -> Self {
        Self::new("metadata".to_string(), max_entries, ttl)
    }

    pub fn new(name: String, max_entries: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().name(&name).max_capacity(max_entries);

        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }

        Self {
            cache: builder.build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Apply pending evictions now instead of on the next access.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl<V> CacheStore<V> for MokaCacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn find(&self, key: &MediaKey) -> Result<Option<CacheEntry<V>>> {
        // Either doesn't exist, was evicted, or TTL expired
        Ok(self.cache.get(key).await)
    }

    async fn upsert(&self, key: MediaKey, data: V) -> Result<()> {
        self.cache
            .insert(key.clone(), CacheEntry::new(key, data))
            .await;
        Ok(())
    }
}

impl<V> Debug for MokaCacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaCacheStore")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}
