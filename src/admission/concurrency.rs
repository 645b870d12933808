//! Bounded in-flight request limiting.
//!
//! [`ConcurrencyLimiter::try_acquire`] never waits: it either hands out a
//! [`ConcurrencyPermit`] or reports that the limit is reached. The permit
//! releases its slot when dropped, so release happens on every exit path,
//! including early returns and panics.

use std::sync::Arc;

use metrics::gauge;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct Shared {
    semaphore: Arc<Semaphore>,
    max: usize,
    active: Mutex<usize>,
}

impl Shared {
    fn adjust_active(&self, delta: isize) -> usize {
        let mut active = self.active.lock();
        *active = active.saturating_add_signed(delta);
        gauge!("heif_concurrent_requests").set(*active as f64);
        *active
    }
}

/// Counting semaphore with an observable active count.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    shared: Arc<Shared>,
}

impl ConcurrencyLimiter {
    /// Allow at most `max` concurrent holders (at least one).
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            shared: Arc::new(Shared {
                semaphore: Arc::new(Semaphore::new(max)),
                max,
                active: Mutex::new(0),
            }),
        }
    }

    /// Take a slot if one is free.
    pub fn try_acquire(&self) -> Option<ConcurrencyPermit> {
        let permit = self.shared.semaphore.clone().try_acquire_owned().ok()?;
        self.shared.adjust_active(1);
        Some(ConcurrencyPermit {
            shared: self.shared.clone(),
            _permit: permit,
        })
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        *self.shared.active.lock()
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.shared.semaphore.available_permits()
    }

    pub fn max(&self) -> usize {
        self.shared.max
    }
}

impl std::fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("max", &self.max())
            .field("active", &self.active())
            .finish()
    }
}

/// A held concurrency slot. Dropping it frees the slot.
pub struct ConcurrencyPermit {
    shared: Arc<Shared>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        // The semaphore permit is released after this body, when its field drops.
        self.shared.adjust_active(-1);
    }
}

impl std::fmt::Debug for ConcurrencyPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyPermit").finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
