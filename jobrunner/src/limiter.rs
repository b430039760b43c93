//! Process-wide concurrency limiter.
//!
//! A counting permit pool shared by every run a dispatcher starts. Slots are
//! released when the [`Slot`] guard drops, so every exit path of a run gives
//! its slot back.

use crate::error::{RunnerError, RunnerResult};
use jobrunner_log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds how many guarded runs execute at once.
#[derive(Debug)]
pub struct Limiter {
    semaphore: Option<Arc<Semaphore>>,
    capacity: usize,
    in_use: Arc<AtomicUsize>,
}

impl Limiter {
    /// Create a limiter with `capacity` slots. A capacity of `0` means
    /// unlimited: acquiring never waits.
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            info!("Concurrency limiter disabled");
        } else {
            info!("Concurrency limiter initialized with {} slots", capacity);
        }

        Self {
            semaphore: (capacity > 0).then(|| Arc::new(Semaphore::new(capacity))),
            capacity,
            in_use: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a limiter that never blocks.
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Configured capacity, `None` when unlimited.
    pub fn capacity(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|_| self.capacity)
    }

    /// Whether a capacity is enforced.
    pub fn is_limited(&self) -> bool {
        self.semaphore.is_some()
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Free slots, `None` when unlimited.
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Wait until a slot is free and take it.
    ///
    /// Waiters are served in arrival order. Returns
    /// [`RunnerError::LimiterClosed`] only after [`Limiter::close`].
    pub async fn acquire(&self) -> RunnerResult<Slot> {
        let permit = match &self.semaphore {
            Some(semaphore) => {
                if semaphore.available_permits() == 0 {
                    debug!(target: "jobrunner::limiter", "All {} slots busy, waiting", self.capacity);
                }
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| RunnerError::LimiterClosed)?;
                Some(permit)
            }
            None => None,
        };

        Ok(self.slot(permit))
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(&self) -> Option<Slot> {
        let permit = match &self.semaphore {
            Some(semaphore) => Some(semaphore.clone().try_acquire_owned().ok()?),
            None => None,
        };

        Some(self.slot(permit))
    }

    /// Close the pool. Pending and future `acquire` calls fail; slots already
    /// held stay valid until dropped.
    ///
    /// This is an opt-in shutdown hook. A full pool on its own never fails an
    /// acquisition, it only makes the caller wait, and the dispatcher never
    /// closes its limiter by itself. Runs that find the pool closed are
    /// reported as failed.
    ///
    /// Closing an unlimited limiter has no effect.
    pub fn close(&self) {
        if let Some(semaphore) = &self.semaphore {
            semaphore.close();
        }
    }

    fn slot(&self, permit: Option<OwnedSemaphorePermit>) -> Slot {
        self.in_use.fetch_add(1, Ordering::SeqCst);
        Slot {
            _permit: permit,
            in_use: self.in_use.clone(),
        }
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// One unit of permitted concurrency. Released on drop.
#[derive(Debug)]
pub struct Slot {
    _permit: Option<OwnedSemaphorePermit>,
    in_use: Arc<AtomicUsize>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_limiter_capacity() {
        let limiter = Limiter::new(2);
        assert_eq!(limiter.capacity(), Some(2));
        assert!(limiter.is_limited());

        let a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_use(), 2);
        assert_eq!(limiter.available(), Some(0));
        assert!(limiter.try_acquire().is_none());

        drop(a);
        assert_eq!(limiter.in_use(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_unlimited_never_blocks() {
        let limiter = Limiter::unlimited();
        assert_eq!(limiter.capacity(), None);

        let slots: Vec<Slot> = (0..100).filter_map(|_| limiter.try_acquire()).collect();
        assert_eq!(slots.len(), 100);
        assert_eq!(limiter.in_use(), 100);

        drop(slots);
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let limiter = Arc::new(Limiter::new(1));
        let held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let _slot = limiter.acquire().await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should acquire once the slot is free")
            .unwrap();
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn test_closed_limiter_rejects() {
        let limiter = Limiter::new(1);
        limiter.close();

        let result = limiter.acquire().await;
        assert!(matches!(result, Err(RunnerError::LimiterClosed)));
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn test_close_keeps_held_slots() {
        let limiter = Limiter::new(2);
        let held = limiter.acquire().await.unwrap();

        limiter.close();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.in_use(), 1);

        drop(held);
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn test_close_unlimited_is_noop() {
        let limiter = Limiter::unlimited();
        limiter.close();

        assert!(limiter.acquire().await.is_ok());
    }
}
