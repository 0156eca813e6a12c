use crate::domain::MediaKey;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome of a best-effort write, published on the write pool's event channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    Stored(EntryStoredEvent),
    WriteFailed(WriteFailedEvent),
    WriteDropped(WriteDroppedEvent),
}

impl CacheEvent {
    pub fn key(&self) -> &MediaKey {
        match self {
            CacheEvent::Stored(e) => &e.key,
            CacheEvent::WriteFailed(e) => &e.key,
            CacheEvent::WriteDropped(e) => &e.key,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryStoredEvent {
    pub key: MediaKey,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFailedEvent {
    pub key: MediaKey,
    pub reason: String,
    pub timestamp: u64,
}

/// The write queue was full or closed; the write never reached the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteDroppedEvent {
    pub key: MediaKey,
    pub timestamp: u64,
}

/// Helper to get current timestamp in seconds since UNIX epoch
pub fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
