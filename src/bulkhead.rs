//! Process-wide bulkhead semaphores (§4.8 step 3, §5, §9 "Bulkhead
//! identity"): a concurrent map from `limitKey` to a counting semaphore,
//! capacity taken from `limits.moduleConcurrency.maxInFlight[limitKey]`
//! (unbounded when unconfigured).
//!
//! No teacher precedent exists for bounded-concurrency admission control
//! (the teacher pack has no `Semaphore`/`buffer_unordered`/`JoinSet`
//! anywhere) — this is a first-principles addition built on the
//! `tokio::sync::Semaphore` already pulled in for the `sync` feature.
//! Structured the same way [`crate::context::FlowContext`]'s memo table is:
//! a `parking_lot::Mutex`-guarded `FxHashMap`, lazily populated.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::cancellation::CancellationToken;

/// Why [`Bulkhead::acquire`] failed to hand back a permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkheadDenied {
    /// The caller's deadline passed before a permit became free.
    DeadlineExceeded,
    /// The caller's cancellation token fired before a permit became free.
    Canceled,
}

/// A process-wide registry of per-`limitKey` counting semaphores.
///
/// Capacity changes at snapshot-adoption time take effect lazily: an
/// existing semaphore for a `limitKey` is never resized or replaced once
/// created, matching §9's "capacity changes must not invalidate in-flight
/// permits" rule — the engine is expected to create a fresh `Bulkhead` (or
/// accept the already-lazily-created one) rather than mutate capacities of
/// live semaphores.
#[derive(Default)]
pub struct Bulkhead {
    semaphores: Mutex<FxHashMap<String, Arc<Semaphore>>>,
}

/// A constant standing in for "no configured limit": `Semaphore::MAX_PERMITS`
/// is effectively unbounded for any realistic fan-out width.
const UNBOUNDED_PERMITS: usize = Semaphore::MAX_PERMITS;

impl Bulkhead {
    pub fn new() -> Self {
        Self::default()
    }

    fn semaphore_for(&self, limit_key: &str, configured_capacity: Option<u32>) -> Arc<Semaphore> {
        let mut table = self.semaphores.lock();
        table
            .entry(limit_key.to_string())
            .or_insert_with(|| {
                let capacity = configured_capacity.map(|c| c as usize).unwrap_or(UNBOUNDED_PERMITS);
                Arc::new(Semaphore::new(capacity))
            })
            .clone()
    }

    /// Acquire a permit for `limit_key`, respecting `cancellation` and
    /// `deadline`. `configured_capacity` is only consulted the first time a
    /// `limit_key` is seen by this `Bulkhead` instance.
    pub async fn acquire(
        &self,
        limit_key: &str,
        configured_capacity: Option<u32>,
        cancellation: &CancellationToken,
        deadline: std::time::Instant,
    ) -> Result<OwnedSemaphorePermit, BulkheadDenied> {
        let semaphore = self.semaphore_for(limit_key, configured_capacity);
        let now = std::time::Instant::now();
        if now >= deadline {
            return Err(BulkheadDenied::DeadlineExceeded);
        }
        let budget = deadline - now;

        let acquire_fut = semaphore.acquire_owned();
        let cancel_fut = cancellation.cancelled();
        tokio::pin!(acquire_fut);
        tokio::pin!(cancel_fut);

        match timeout(budget, async {
            tokio::select! {
                biased;
                () = &mut cancel_fut => None,
                permit = &mut acquire_fut => permit.ok(),
            }
        })
        .await
        {
            Ok(Some(permit)) => Ok(permit),
            Ok(None) => Err(BulkheadDenied::Canceled),
            Err(_) => Err(BulkheadDenied::DeadlineExceeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn unconfigured_limit_key_is_effectively_unbounded() {
        let bulkhead = Bulkhead::new();
        let cancellation = CancellationToken::new();
        let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
        let a = bulkhead.acquire("k", None, &cancellation, deadline).await.unwrap();
        let b = bulkhead.acquire("k", None, &cancellation, deadline).await.unwrap();
        drop((a, b));
    }

    #[tokio::test]
    async fn second_acquirer_blocks_until_first_releases() {
        let bulkhead = Arc::new(Bulkhead::new());
        let cancellation = CancellationToken::new();
        let deadline = std::time::Instant::now() + StdDuration::from_secs(5);

        let first = bulkhead.acquire("k", Some(1), &cancellation, deadline).await.unwrap();

        let bulkhead2 = bulkhead.clone();
        let cancellation2 = cancellation.clone();
        let waiter = tokio::spawn(async move { bulkhead2.acquire("k", Some(1), &cancellation2, deadline).await });

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = waiter.await.unwrap();
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn deadline_exceeded_denies_acquisition() {
        let bulkhead = Bulkhead::new();
        let cancellation = CancellationToken::new();
        let _held = bulkhead.acquire("k", Some(1), &cancellation, std::time::Instant::now() + StdDuration::from_secs(5)).await.unwrap();

        let tight_deadline = std::time::Instant::now() + StdDuration::from_millis(20);
        let result = bulkhead.acquire("k", Some(1), &cancellation, tight_deadline).await;
        assert_eq!(result.unwrap_err(), BulkheadDenied::DeadlineExceeded);
    }

    #[tokio::test]
    async fn cancellation_denies_acquisition() {
        let bulkhead = Bulkhead::new();
        let cancellation = CancellationToken::new();
        let _held = bulkhead.acquire("k", Some(1), &cancellation, std::time::Instant::now() + StdDuration::from_secs(5)).await.unwrap();

        let bulkhead = Arc::new(bulkhead);
        let b2 = bulkhead.clone();
        let c2 = cancellation.clone();
        let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
        let waiter = tokio::spawn(async move { b2.acquire("k", Some(1), &c2, deadline).await });

        tokio::time::sleep(StdDuration::from_millis(10)).await;
        cancellation.cancel();
        let result = waiter.await.unwrap();
        assert_eq!(result.unwrap_err(), BulkheadDenied::Canceled);
    }
}
