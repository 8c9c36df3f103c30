//! Bounded concurrency gate for delivery attempts.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::error::{CoreError, Result};

/// Limits how many guarded operations run at once.
///
/// A slot is held by a [`RateLimitPermit`] and returned when the permit is
/// dropped, so early returns, `?` and panics all release it.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

/// An acquired slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct RateLimitPermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    /// Creates a limiter with `limit` slots. A limit of zero is raised to one.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Waits for a free slot.
    pub async fn acquire(&self) -> Result<RateLimitPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| CoreError::LimiterClosed)?;
        trace!(available = self.available(), "rate limit slot acquired");
        Ok(RateLimitPermit { _permit: permit })
    }

    /// Takes a slot only if one is free right now.
    #[must_use]
    pub fn try_acquire(&self) -> Option<RateLimitPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| RateLimitPermit { _permit: permit })
    }

    /// Runs `op` while holding a slot.
    pub async fn run<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(op().await)
    }

    /// Number of free slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Configured number of slots.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Wakes all waiters with `CoreError::LimiterClosed`.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn zero_limit_is_raised_to_one() {
        let limiter = RateLimiter::new(0);
        assert_eq!(limiter.limit(), 1);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn drop_releases_slot() {
        let limiter = RateLimiter::new(2);
        let first = limiter.acquire().await.unwrap();
        let second = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);
        assert!(limiter.try_acquire().is_none());

        drop(first);
        assert_eq!(limiter.available(), 1);
        drop(second);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn second_caller_waits_for_release() {
        let limiter = RateLimiter::new(1);
        let held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(joined.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn limit_one_never_overlaps() {
        let limiter = RateLimiter::new(1);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                limiter
                    .run(|| async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn slot_released_when_guarded_task_panics() {
        let limiter = RateLimiter::new(1);
        let task_limiter = limiter.clone();

        let result = tokio::spawn(async move {
            let _permit = task_limiter.acquire().await.unwrap();
            panic!("boom");
        })
        .await;

        assert!(result.is_err());
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn close_fails_waiters() {
        let limiter = RateLimiter::new(1);
        let _held = limiter.acquire().await.unwrap();
        limiter.close();
        assert!(matches!(
            limiter.acquire().await,
            Err(CoreError::LimiterClosed)
        ));
    }
}
