//! Instrumented in-memory store for unit tests.

use crate::domain::{CacheEntry, MediaKey};
use crate::ports::CacheStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

pub struct TestStore<V> {
    entries: RwLock<HashMap<MediaKey, CacheEntry<V>>>,
    available: AtomicBool,
    fail_finds: AtomicBool,
    fail_upserts: AtomicBool,
    find_delay: Mutex<Duration>,
    upsert_delay: Mutex<Duration>,
    find_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
}

impl<V: Clone + Send + Sync + 'static> TestStore<V> {
    pub fn new() -> Self {
        shared::telemetry::init_test_tracing();
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            fail_finds: AtomicBool::new(false),
            fail_upserts: AtomicBool::new(false),
            find_delay: Mutex::new(Duration::ZERO),
            upsert_delay: Mutex::new(Duration::ZERO),
            find_calls: AtomicUsize::new(0),
            upsert_calls: AtomicUsize::new(0),
        }
    }

    pub async fn seed(&self, key: MediaKey, data: V, last_updated: DateTime<Utc>) {
        self.entries
            .write()
            .await
            .insert(key.clone(), CacheEntry::updated_at(key, data, last_updated));
    }

    pub async fn data(&self, key: &MediaKey) -> Option<V> {
        self.entries.read().await.get(key).map(|e| e.data.clone())
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_finds(&self, fail: bool) {
        self.fail_finds.store(fail, Ordering::SeqCst);
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn set_find_delay(&self, delay: Duration) {
        *self.find_delay.lock().unwrap() = delay;
    }

    pub fn set_upsert_delay(&self, delay: Duration) {
        *self.upsert_delay.lock().unwrap() = delay;
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> CacheStore<V> for TestStore<V> {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn find(&self, key: &MediaKey) -> Result<Option<CacheEntry<V>>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.find_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_finds.load(Ordering::SeqCst) {
            return Err(Error::Storage("find failed".to_string()));
        }
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn upsert(&self, key: MediaKey, data: V) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.upsert_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(Error::Storage("upsert failed".to_string()));
        }
        self.entries
            .write()
            .await
            .insert(key.clone(), CacheEntry::new(key, data));
        Ok(())
    }
}
