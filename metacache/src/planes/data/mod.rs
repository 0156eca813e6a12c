pub mod batch;
pub mod orchestrator;

pub use batch::{BatchConfig, BatchProcessor};
pub use orchestrator::{CacheSettings, Fetched, MetadataCache, Source};
