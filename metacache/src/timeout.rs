//! Deadline racing.
//!
//! The operation that loses a race is dropped, which stops it at its next
//! suspension point. Work it already moved onto a spawned task keeps running;
//! background tasks in this crate take a `CancellationToken` for that reason.

use shared::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Resolve with `operation`'s output, or `Error::Timeout` once `budget` elapses.
pub async fn race<F>(operation: F, budget: Duration) -> Result<F::Output>
where
    F: Future,
{
    tokio::time::timeout(budget, operation)
        .await
        .map_err(|_| Error::Timeout(budget))
}

/// [`race`] when a budget is given, a plain await otherwise.
pub async fn bounded<F>(operation: F, budget: Option<Duration>) -> Result<F::Output>
where
    F: Future,
{
    match budget {
        Some(budget) => race(operation, budget).await,
        None => Ok(operation.await),
    }
}
