use crate::timeout::race;
use futures::future::join_all;
use shared::config::Config;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug)]
pub struct BatchConfig {
    /// Wall-clock budget for the whole batch, checked between chunks.
    pub deadline: Duration,
    pub item_timeout: Duration,
    /// Pause between chunks to throttle the store and providers.
    pub chunk_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(12),
            item_timeout: Duration::from_secs(5),
            chunk_delay: Duration::from_millis(300),
        }
    }
}

impl From<&Config> for BatchConfig {
    fn from(config: &Config) -> Self {
        Self {
            deadline: config.batch_deadline,
            item_timeout: config.batch_item_timeout,
            chunk_delay: config.batch_chunk_delay,
        }
    }
}

/// Drives a per-item fetch over many items in chunks.
///
/// Items of a chunk are polled concurrently on the calling task, so at most
/// `concurrency` fetches are in flight. Failures, `None`s and timeouts simply
/// shorten the output; the result keeps input order.
#[derive(Clone, Debug, Default)]
pub struct BatchProcessor {
    config: BatchConfig,
}

impl BatchProcessor {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub async fn process<I, T, F, Fut>(&self, items: Vec<I>, fetch_fn: F, concurrency: usize) -> Vec<T>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        self.process_until(items, fetch_fn, concurrency, &CancellationToken::new())
            .await
    }

    /// [`process`](Self::process) that also stops when `cancel` fires. A
    /// cancelled chunk is abandoned and its in-flight fetches are dropped.
    pub async fn process_until<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        fetch_fn: F,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Vec<T>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let started = Instant::now();
        let deadline = started + self.config.deadline;
        let chunk_size = concurrency.max(1);
        let total = items.len();

        let mut results = Vec::with_capacity(total);
        let mut timed_out = 0usize;
        let mut chunks_run = 0usize;
        let mut items = items.into_iter().peekable();

        while items.peek().is_some() {
            if Instant::now() >= deadline {
                warn!(
                    processed = chunks_run * chunk_size,
                    total, "Batch deadline reached, returning partial results"
                );
                break;
            }

            let chunk: Vec<I> = items.by_ref().take(chunk_size).collect();
            let in_flight = chunk
                .into_iter()
                .map(|item| race(fetch_fn(item), self.config.item_timeout));

            let settled = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(total, "Batch cancelled, returning partial results");
                    break;
                }
                settled = join_all(in_flight) => settled,
            };
            chunks_run += 1;

            for outcome in settled {
                match outcome {
                    Ok(Some(value)) => results.push(value),
                    Ok(None) => {}
                    Err(_) => timed_out += 1,
                }
            }

            if items.peek().is_some() && !self.config.chunk_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(total, "Batch cancelled, returning partial results");
                        break;
                    }
                    _ = sleep(self.config.chunk_delay) => {}
                }
            }
        }

        if timed_out > 0 {
            debug!(timed_out, "Batch items exceeded the per-item timeout");
        }
        info!(
            delivered = results.len(),
            total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch finished"
        );
        results
    }
}
