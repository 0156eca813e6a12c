use crate::persistence::SledCacheStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{Error, Result};
use shared::config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounds on how much the persistent store may accumulate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub interval: Duration,
    pub max_entry_age: Option<Duration>,
    pub max_entries: Option<usize>,
}

impl From<&Config> for RetentionPolicy {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.sweep_interval,
            max_entry_age: config.entry_ttl,
            max_entries: Some(config.max_entries as usize),
        }
    }
}

/// One retention pass: age first, then capacity. Returns entries removed.
pub fn sweep_once<V>(store: &SledCacheStore<V>, policy: &RetentionPolicy) -> Result<usize>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let mut removed = 0;
    if let Some(max_age) = policy.max_entry_age {
        removed += store.sweep_older_than(max_age)?;
    }
    if let Some(max_entries) = policy.max_entries {
        removed += store.enforce_capacity(max_entries)?;
    }
    Ok(removed)
}

/// Run [`sweep_once`] on the blocking pool every `policy.interval` until
/// `cancel` fires.
pub fn spawn_sweeper<V>(
    store: Arc<SledCacheStore<V>>,
    policy: RetentionPolicy,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(policy.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let sweeping = store.clone();
            let swept = tokio::task::spawn_blocking(move || sweep_once(&sweeping, &policy))
                .await
                .map_err(|e| Error::Internal(format!("Retention task failed: {}", e)))
                .and_then(|swept| swept);

            match swept {
                Ok(0) => debug!("Retention sweep removed nothing"),
                Ok(removed) => info!(removed, remaining = store.len(), "Retention sweep"),
                Err(e) => warn!("Retention sweep failed: {}", e),
            }
        }
        debug!("Retention sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MediaKey, MediaType};
    use crate::ports::CacheStore;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn test_sweep_once_applies_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let store: SledCacheStore<Value> =
            SledCacheStore::new(dir.path().join("sweep.sled")).unwrap();
        for id in 0..5 {
            store
                .upsert(MediaKey::new(id.to_string(), MediaType::Tv), json!({ "id": id }))
                .await
                .unwrap();
        }

        let policy = RetentionPolicy {
            interval: Duration::from_secs(60),
            max_entry_age: Some(Duration::from_secs(3600)),
            max_entries: Some(3),
        };

        assert_eq!(sweep_once(&store, &policy).unwrap(), 2);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_sweeper_runs_and_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<SledCacheStore<Value>> =
            Arc::new(SledCacheStore::new(dir.path().join("sweep.sled")).unwrap());
        for id in 0..4 {
            store
                .upsert(MediaKey::new(id.to_string(), MediaType::Anime), json!({}))
                .await
                .unwrap();
        }

        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(
            store.clone(),
            RetentionPolicy {
                interval: Duration::from_millis(10),
                max_entry_age: None,
                max_entries: Some(1),
            },
            cancel.clone(),
        );

        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(store.len(), 1);
    }
}
