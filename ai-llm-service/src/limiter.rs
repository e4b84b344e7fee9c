//! Concurrency limiter guarding every provider call.
//!
//! A semaphore of `AI_MAX_CONCURRENCY` permits. Acquire checks the shutdown
//! flag before touching the semaphore so post-drain callers fail fast with
//! the stable sentinel. `drain` closes the semaphore (releasing every queued
//! waiter with the same sentinel) and waits for active calls to finish.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn};

use crate::error_handler::AiLlmError;

/// Default permit count when `AI_MAX_CONCURRENCY` is unset.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

pub struct AiLimiter {
    sem: Arc<Semaphore>,
    capacity: usize,
    shutdown: AtomicBool,
    active: Arc<AtomicUsize>,
    max_active: AtomicUsize,
    drained: Arc<Notify>,
}

/// RAII permit; dropping it releases the slot and wakes the drain waiter.
#[derive(Debug)]
pub struct AiPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl Drop for AiPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.drained.notify_waiters();
    }
}

impl AiLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sem: Arc::new(Semaphore::new(capacity)),
            capacity,
            shutdown: AtomicBool::new(false),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: AtomicUsize::new(0),
            drained: Arc::new(Notify::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest concurrent occupancy observed so far. Test hook.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Acquires a slot, or fails fast with the shutdown sentinel.
    pub async fn acquire(&self) -> Result<AiPermit, AiLlmError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(AiLlmError::ShuttingDown);
        }
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AiLlmError::ShuttingDown)?;
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        debug!(active = now_active, capacity = self.capacity, "ai slot acquired");
        Ok(AiPermit {
            _permit: permit,
            active: self.active.clone(),
            drained: self.drained.clone(),
        })
    }

    /// Runs one task under a slot.
    pub async fn with_limit<F, Fut, T>(&self, task: F) -> Result<T, AiLlmError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(task().await)
    }

    /// Flips the shutdown flag, releases queued waiters with the sentinel,
    /// then waits up to `timeout` for active calls to finish.
    ///
    /// Returns `true` iff the active count reached zero before the deadline.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.shutdown.store(true, Ordering::SeqCst);
        self.sem.close();
        info!(active = self.active(), "ai limiter draining");

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.active() == 0 {
                return true;
            }
            let notified = self.drained.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(active = self.active(), "ai limiter drain timed out");
                return self.active() == 0;
            }
        }
    }
}

static LIMITER: OnceLock<AiLimiter> = OnceLock::new();

/// Process-wide limiter, sized from `AI_MAX_CONCURRENCY` on first use.
pub fn limiter() -> &'static AiLimiter {
    LIMITER.get_or_init(|| {
        let capacity = std::env::var("AI_MAX_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONCURRENCY);
        AiLimiter::new(capacity)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn occupancy_never_exceeds_capacity() {
        let limiter = Arc::new(AiLimiter::new(3));
        let mut tasks = Vec::new();
        for _ in 0..9 {
            let l = limiter.clone();
            tasks.push(tokio::spawn(async move {
                l.with_limit(|| async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                })
                .await
                .unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert!(limiter.max_active() <= 3);
        assert_eq!(limiter.active(), 0);
    }

    #[tokio::test]
    async fn drain_releases_queued_waiters_with_sentinel() {
        let limiter = Arc::new(AiLimiter::new(1));
        let held = limiter.acquire().await.unwrap();

        let l = limiter.clone();
        let queued = tokio::spawn(async move { l.acquire().await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let l = limiter.clone();
        let drainer =
            tokio::spawn(async move { l.drain(Duration::from_millis(500)).await });

        let err = queued.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), http_client::SHUTDOWN_SENTINEL);

        drop(held);
        assert!(drainer.await.unwrap());

        let err = limiter.acquire().await.unwrap_err();
        assert_eq!(err.to_string(), http_client::SHUTDOWN_SENTINEL);
    }

    #[tokio::test]
    async fn drain_times_out_while_a_call_is_active() {
        let limiter = Arc::new(AiLimiter::new(1));
        let held = limiter.acquire().await.unwrap();
        assert!(!limiter.drain(Duration::from_millis(30)).await);
        drop(held);
    }
}
