//! Concrete metadata store backends and the factory that picks one.

pub mod moka_cache;

pub use moka_cache::MokaCacheStore;

use metacache::persistence::SledCacheStore;
use metacache::planes::control::{RetentionPolicy, spawn_sweeper};
use metacache::ports::{CacheStore, StorageFactory};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::config::{Config, StoreBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SLED_FILE: &str = "metacache.sled";

/// Builds the configured backend. A sled store that cannot be opened falls
/// back to the bounded in-memory store rather than failing startup.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnifiedStorageFactory;

impl UnifiedStorageFactory {
    pub fn sled_path(config: &Config) -> PathBuf {
        Path::new(&config.data_dir).join(SLED_FILE)
    }

    /// Like [`StorageFactory::create_from_config`], but a sled store also gets
    /// a retention sweeper built from the config's age and capacity limits.
    /// The sweeper runs until `cancel` fires; the memory store evicts on its
    /// own and gets none.
    pub fn create_with_retention<V>(
        &self,
        config: &Config,
        cancel: &CancellationToken,
    ) -> (Arc<dyn CacheStore<V>>, Option<JoinHandle<()>>)
    where
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        match Self::open(config) {
            Backend::Sled(store) => {
                let policy = RetentionPolicy::from(config);
                info!(
                    interval_ms = policy.interval.as_millis() as u64,
                    max_entries = ?policy.max_entries,
                    max_entry_age_ms = ?policy.max_entry_age.map(|age| age.as_millis() as u64),
                    "Starting retention sweeper"
                );
                let sweeper = spawn_sweeper(store.clone(), policy, cancel.clone());
                let store: Arc<dyn CacheStore<V>> = store;
                (store, Some(sweeper))
            }
            Backend::Memory(store) => (store, None),
        }
    }

    fn open<V>(config: &Config) -> Backend<V>
    where
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        match config.store_backend {
            StoreBackend::Memory => {
                info!(max_entries = config.max_entries, "Using in-memory metadata store");
                Backend::Memory(Self::memory(config))
            }
            StoreBackend::Sled => {
                let path = Self::sled_path(config);
                match SledCacheStore::<V>::new(&path) {
                    Ok(store) => {
                        info!("Using sled metadata store at {}", path.display());
                        Backend::Sled(Arc::new(store))
                    }
                    Err(e) => {
                        warn!(
                            "Failed to open sled store at {}: {}. Running in-memory mode.",
                            path.display(),
                            e
                        );
                        Backend::Memory(Self::memory(config))
                    }
                }
            }
        }
    }

    fn memory<V>(config: &Config) -> Arc<dyn CacheStore<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        Arc::new(MokaCacheStore::new(
            "metadata".to_string(),
            config.max_entries,
            config.entry_ttl,
        ))
    }
}

enum Backend<V> {
    Sled(Arc<SledCacheStore<V>>),
    Memory(Arc<dyn CacheStore<V>>),
}

/// Builds the store without retention; a sled store grows until something
/// sweeps it. See [`UnifiedStorageFactory::create_with_retention`].
impl<V> StorageFactory<V> for UnifiedStorageFactory
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn create_from_config(&self, config: &Config) -> Arc<dyn CacheStore<V>> {
        match Self::open(config) {
            Backend::Sled(store) => store as Arc<dyn CacheStore<V>>,
            Backend::Memory(store) => store,
        }
    }
}
