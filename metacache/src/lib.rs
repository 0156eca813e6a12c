//! Read-through metadata cache with stale fallback, bounded batch fetching and
//! best-effort write-behind persistence.

pub mod domain;
pub mod events;
pub mod persistence;
pub mod planes;
pub mod ports;
pub mod timeout;

#[cfg(test)]
pub(crate) mod test_support;

pub use domain::{CacheEntry, CachePolicy, HasMediaKey, LoaderBudget, MediaKey, MediaType};
pub use planes::data::{BatchConfig, BatchProcessor, CacheSettings, Fetched, MetadataCache, Source};
pub use ports::{CacheStore, StorageFactory};
