#![deny(clippy::all)]

use crate::domain::{CacheEntry, MediaKey};
use async_trait::async_trait;
use shared::Result;
use shared::config::Config;
use std::sync::Arc;

// Ports are the pluggable extension points for underlying cache stores

/// Port for creating a cache store from configuration
pub trait StorageFactory<V>: Send + Sync + 'static {
    fn create_from_config(&self, config: &Config) -> Arc<dyn CacheStore<V>>;
}

/// Port for the persistence collaborator behind the metadata cache.
///
/// Implementations may be slow or unreachable; callers bound every call with
/// their own deadline and never surface store errors to readers.
#[async_trait]
pub trait CacheStore<V>: Send + Sync + 'static {
    /// Connection-level reachability. `false` puts callers into pass-through
    /// mode where the store is skipped entirely.
    fn is_available(&self) -> bool {
        true
    }

    async fn find(&self, key: &MediaKey) -> Result<Option<CacheEntry<V>>>;

    /// Insert or overwrite the entry for `key`, stamping it with the current
    /// time. Concurrent upserts for one key are last-writer-wins.
    async fn upsert(&self, key: MediaKey, data: V) -> Result<()>;
}
