use crate::domain::{CacheEntry, CachePolicy, HasMediaKey, MediaKey};
use crate::events::CacheEvent;
use crate::planes::control::{WriteBehind, WriteBehindConfig};
use crate::planes::data::batch::BatchProcessor;
use crate::ports::CacheStore;
use crate::timeout::{bounded, race};
use shared::config::Config;
use shared::{Error, Result};
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct CacheSettings {
    /// Deadline for a store lookup; a late answer counts as a miss.
    pub lookup_timeout: Duration,
    pub policy: CachePolicy,
    pub write: WriteBehindConfig,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(2),
            policy: CachePolicy::default(),
            write: WriteBehindConfig::default(),
        }
    }
}

impl From<&Config> for CacheSettings {
    fn from(config: &Config) -> Self {
        Self {
            lookup_timeout: config.lookup_timeout,
            policy: CachePolicy::from(config),
            write: WriteBehindConfig::from(config),
        }
    }
}

/// Where a returned value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    /// Cached entry younger than `max_age`.
    Fresh,
    /// Stale entry replaced by a successful loader call.
    Refreshed,
    /// Stale entry served because the loader failed or timed out.
    Stale,
    /// No entry; loaded from the provider.
    Loaded,
    /// Store unreachable; loaded without touching the cache.
    PassThrough,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Fetched<V> {
    pub data: V,
    pub source: Source,
}

impl<V> Fetched<V> {
    fn new(data: V, source: Source) -> Self {
        Self { data, source }
    }
}

/// Read-through cache over a [`CacheStore`] with stale fallback.
///
/// The only writer of the store. Every failure collapses into fresh data, stale
/// data or `None`; nothing is ever returned as an error.
pub struct MetadataCache<V> {
    store: Arc<dyn CacheStore<V>>,
    writer: WriteBehind<V>,
    settings: CacheSettings,
}

impl<V> MetadataCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Must be called from within a tokio runtime (the write pool is spawned).
    pub fn new(store: Arc<dyn CacheStore<V>>, settings: CacheSettings) -> Self {
        let writer = WriteBehind::spawn(store.clone(), settings.write);
        Self {
            store,
            writer,
            settings,
        }
    }

    pub fn from_config(store: Arc<dyn CacheStore<V>>, config: &Config) -> Self {
        Self::new(store, CacheSettings::from(config))
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Fresh or stale data for `key`, or `None` when nothing is available.
    ///
    /// `loader` is called at most once, and not at all on a fresh hit.
    pub async fn fetch<F, Fut, E>(&self, key: &MediaKey, loader: F, max_age: Duration) -> Option<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Display,
    {
        self.fetch_detailed(key, loader, max_age)
            .await
            .map(|fetched| fetched.data)
    }

    /// [`fetch`](Self::fetch), also reporting where the value came from.
    pub async fn fetch_detailed<F, Fut, E>(
        &self,
        key: &MediaKey,
        loader: F,
        max_age: Duration,
    ) -> Option<Fetched<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Display,
    {
        let budget = self.settings.policy.budget_for(key.media_type);

        if !self.store.is_available() {
            debug!(key = %key, "Store unavailable, passing through to loader");
            return match load(loader, budget.on_miss).await {
                Ok(data) => Some(Fetched::new(data, Source::PassThrough)),
                Err(e) => {
                    warn!(key = %key, "Pass-through load failed: {}", e);
                    None
                }
            };
        }

        // A write still in the pool is newer than anything the store holds.
        let cached = match self.writer.staged(key) {
            Some(entry) => Some(entry),
            None => self.lookup(key).await,
        };

        match cached {
            Some(entry) if entry.is_fresh(max_age) => {
                debug!(key = %key, age_ms = entry.age().as_millis() as u64, "Cache hit");
                Some(Fetched::new(entry.data, Source::Fresh))
            }
            Some(entry) => match load(loader, budget.on_stale).await {
                Ok(data) => {
                    debug!(key = %key, "Stale entry refreshed");
                    self.writer.submit(key.clone(), data.clone());
                    Some(Fetched::new(data, Source::Refreshed))
                }
                Err(e) => {
                    warn!(
                        key = %key,
                        age_ms = entry.age().as_millis() as u64,
                        "Refresh failed, serving stale entry: {}",
                        e
                    );
                    Some(Fetched::new(entry.data, Source::Stale))
                }
            },
            None => match load(loader, budget.on_miss).await {
                Ok(data) => {
                    debug!(key = %key, "Cache miss loaded");
                    self.writer.submit(key.clone(), data.clone());
                    Some(Fetched::new(data, Source::Loaded))
                }
                Err(e) => {
                    warn!(key = %key, "Load failed with no cached entry: {}", e);
                    None
                }
            },
        }
    }

    async fn lookup(&self, key: &MediaKey) -> Option<CacheEntry<V>> {
        match race(self.store.find(key), self.settings.lookup_timeout).await {
            Ok(Ok(entry)) => entry,
            Ok(Err(e)) => {
                warn!(key = %key, "Cache lookup failed, treating as miss: {}", e);
                None
            }
            Err(e) => {
                debug!(key = %key, "Cache lookup {}, treating as miss", e);
                None
            }
        }
    }

    /// Run [`fetch`](Self::fetch) for every item through `processor`.
    ///
    /// Survivors keep their input order and carry their key for correlation.
    pub async fn fetch_batch<I, L, Fut, E>(
        &self,
        processor: &BatchProcessor,
        items: Vec<I>,
        loader: L,
        max_age: Duration,
        concurrency: usize,
    ) -> Vec<(MediaKey, V)>
    where
        I: HasMediaKey,
        L: Fn(&I) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Display,
    {
        let loader = &loader;
        processor
            .process(
                items,
                |item: I| async move {
                    let key = item.media_key().clone();
                    self.fetch(&key, || loader(&item), max_age)
                        .await
                        .map(|data| (key, data))
                },
                concurrency,
            )
            .await
    }

    /// Wait for every write submitted so far to settle.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.writer.subscribe()
    }

    pub fn shutdown(&self) {
        self.writer.shutdown();
    }
}

impl<V> fmt::Debug for MetadataCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataCache")
            .field("settings", &self.settings)
            .field("writer", &self.writer)
            .finish()
    }
}

async fn load<V, F, Fut, E>(loader: F, budget: Option<Duration>) -> Result<V>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<V, E>>,
    E: Display,
{
    match bounded(loader(), budget).await {
        Ok(Ok(data)) => Ok(data),
        Ok(Err(e)) => Err(Error::Loader(e.to_string())),
        Err(e) => Err(e),
    }
}
