//! Admission control in front of the worker pool.
//!
//! A request must pass both gates, in order:
//!
//! ```text
//!   client key ─► RateLimiter::allow ─no─► RateLimited
//!                       │yes
//!                       ▼
//!         ConcurrencyLimiter::try_acquire ─none─► AtCapacity
//!                       │permit
//!                       ▼
//!              handler runs, permit dropped on exit
//! ```

pub mod concurrency;
pub mod rate_limit;

use std::sync::Arc;

use metrics::counter;
use tracing::debug;

pub use concurrency::{ConcurrencyLimiter, ConcurrencyPermit};
pub use rate_limit::{
    key_prefix, Clock, RateLimiter, SystemClock, DEFAULT_BUCKET_TTL, DEFAULT_SWEEP_INTERVAL,
};

use crate::error::AdmissionError;

/// The rate limiter and concurrency limiter, evaluated together.
#[derive(Debug, Clone)]
pub struct Admission {
    rate_limiter: Arc<RateLimiter>,
    concurrency: ConcurrencyLimiter,
}

impl Admission {
    pub fn new(rate_limiter: Arc<RateLimiter>, concurrency: ConcurrencyLimiter) -> Self {
        Self {
            rate_limiter,
            concurrency,
        }
    }

    /// Admit a request from `key`, returning the slot it must hold while it runs.
    ///
    /// A rate-limited request never takes a concurrency slot.
    pub fn admit(&self, key: &str) -> Result<ConcurrencyPermit, AdmissionError> {
        if !self.rate_limiter.allow(key) {
            return Err(AdmissionError::RateLimited {
                key_prefix: key_prefix(key),
            });
        }

        match self.concurrency.try_acquire() {
            Some(permit) => Ok(permit),
            None => {
                counter!("heif_concurrency_limit_exceeded_total").increment(1);
                debug!(
                    active = self.concurrency.active(),
                    max = self.concurrency.max(),
                    "Concurrency limit reached"
                );
                Err(AdmissionError::AtCapacity)
            }
        }
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn concurrency(&self) -> &ConcurrencyLimiter {
        &self.concurrency
    }
}

// =============================================================================
// Tests
// =============================================================================
