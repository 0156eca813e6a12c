use crate::domain::{CacheEntry, MediaKey};
use crate::events::{
    CacheEvent, EntryStoredEvent, WriteDroppedEvent, WriteFailedEvent, now_timestamp,
};
use crate::ports::CacheStore;
use crate::timeout::race;
use dashmap::DashMap;
use shared::config::Config;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, Semaphore, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug)]
pub struct WriteBehindConfig {
    /// Upserts allowed in flight at once.
    pub workers: usize,
    /// Writes buffered before new submissions are dropped.
    pub queue_capacity: usize,
    pub write_timeout: Duration,
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            write_timeout: Duration::from_secs(2),
        }
    }
}

impl From<&Config> for WriteBehindConfig {
    fn from(config: &Config) -> Self {
        Self {
            workers: config.write_workers,
            queue_capacity: config.write_queue_capacity,
            write_timeout: config.write_timeout,
        }
    }
}

struct WriteJob<V> {
    seq: u64,
    key: MediaKey,
    data: V,
}

/// A submitted value not yet settled in the store. `seq` identifies the
/// submission so an older write settling never hides a newer one.
struct Staged<V> {
    seq: u64,
    entry: CacheEntry<V>,
}

/// Writes readable before the store has them.
struct Overlay<V> {
    staged: DashMap<MediaKey, Staged<V>>,
    next_seq: AtomicU64,
}

impl<V> Overlay<V> {
    fn new() -> Self {
        Self {
            staged: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    fn stage(&self, entry: CacheEntry<V>) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.staged.insert(entry.key.clone(), Staged { seq, entry });
        seq
    }

    fn release(&self, key: &MediaKey, seq: u64) {
        self.staged.remove_if(key, |_, staged| staged.seq == seq);
    }
}

/// Tracks submitted-but-unsettled writes so callers can wait for quiescence.
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn settle(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Bounded pool for fire-and-forget cache writes.
///
/// `submit` never waits on the store. Until a write settles its value is served
/// by [`WriteBehind::staged`], so a read right after `submit` sees it. Failures
/// are reported through tracing and the [`CacheEvent`] channel and are
/// otherwise discarded.
pub struct WriteBehind<V> {
    tx: mpsc::Sender<WriteJob<V>>,
    overlay: Arc<Overlay<V>>,
    pending: Arc<Pending>,
    events: broadcast::Sender<CacheEvent>,
    shutdown: CancellationToken,
}

impl<V> WriteBehind<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Start the dispatcher. Must be called from within a tokio runtime.
    pub fn spawn(store: Arc<dyn CacheStore<V>>, config: WriteBehindConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        // 1000 event buffer capacity, lagging subscribers lose the oldest
        let (events, _) = broadcast::channel(1000);
        let overlay = Arc::new(Overlay::new());
        let pending = Arc::new(Pending::default());
        let shutdown = CancellationToken::new();

        tokio::spawn(dispatch(
            store,
            rx,
            overlay.clone(),
            Arc::new(Semaphore::new(config.workers.max(1))),
            config.write_timeout,
            pending.clone(),
            events.clone(),
            shutdown.clone(),
        ));

        Self {
            tx,
            overlay,
            pending,
            events,
            shutdown,
        }
    }

    /// Queue a write. Returns `false` when it was dropped instead.
    pub fn submit(&self, key: MediaKey, data: V) -> bool {
        self.pending.begin();
        let seq = self.overlay.stage(CacheEntry::new(key.clone(), data.clone()));
        match self.tx.try_send(WriteJob { seq, key, data }) {
            Ok(()) => true,
            Err(err) => {
                let (job, reason) = match err {
                    TrySendError::Full(job) => (job, "queue full"),
                    TrySendError::Closed(job) => (job, "pool shut down"),
                };
                self.overlay.release(&job.key, job.seq);
                tracing::warn!(key = %job.key, "Dropping cache write: {}", reason);
                let _ = self.events.send(CacheEvent::WriteDropped(WriteDroppedEvent {
                    key: job.key,
                    timestamp: now_timestamp(),
                }));
                self.pending.settle();
                false
            }
        }
    }

    /// The newest submitted value for `key` that has not settled yet.
    pub fn staged(&self, key: &MediaKey) -> Option<CacheEntry<V>> {
        self.overlay
            .staged
            .get(key)
            .map(|staged| staged.entry.clone())
    }

    /// Wait until every write submitted so far has settled.
    pub async fn flush(&self) {
        loop {
            let notified = self.pending.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Stop accepting work. Queued writes are discarded; in-flight ones finish.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl<V> Drop for WriteBehind<V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<V> fmt::Debug for WriteBehind<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBehind")
            .field("pending", &self.pending.count.load(Ordering::Relaxed))
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

async fn dispatch<V>(
    store: Arc<dyn CacheStore<V>>,
    mut rx: mpsc::Receiver<WriteJob<V>>,
    overlay: Arc<Overlay<V>>,
    permits: Arc<Semaphore>,
    write_timeout: Duration,
    pending: Arc<Pending>,
    events: broadcast::Sender<CacheEvent>,
    shutdown: CancellationToken,
) where
    V: Send + Sync + 'static,
{
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                overlay.release(&job.key, job.seq);
                pending.settle();
                break;
            }
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    overlay.release(&job.key, job.seq);
                    pending.settle();
                    break;
                }
            },
        };

        let store = store.clone();
        let overlay = overlay.clone();
        let pending = pending.clone();
        let events = events.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let key = job.key.clone();
            let seq = job.seq;

            let outcome = race(store.upsert(job.key, job.data), write_timeout)
                .await
                .and_then(|written| written);

            let event = match outcome {
                Ok(()) => {
                    tracing::debug!(key = %key, "Cache entry stored");
                    CacheEvent::Stored(EntryStoredEvent {
                        key: key.clone(),
                        timestamp: now_timestamp(),
                    })
                }
                Err(e) => {
                    tracing::warn!(key = %key, "Best-effort cache write failed: {}", e);
                    CacheEvent::WriteFailed(WriteFailedEvent {
                        key: key.clone(),
                        reason: e.to_string(),
                        timestamp: now_timestamp(),
                    })
                }
            };
            overlay.release(&key, seq);
            // No subscribers is the common case
            let _ = events.send(event);
            pending.settle();
        });
    }

    rx.close();
    while let Ok(job) = rx.try_recv() {
        overlay.release(&job.key, job.seq);
        pending.settle();
    }
    tracing::debug!("Write-behind dispatcher stopped");
}
