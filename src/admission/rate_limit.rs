//! Per-key token bucket rate limiting.
//!
//! Each key owns a bucket holding up to `burst` tokens that refills at `rate`
//! tokens per second. A request consumes one token. Buckets are created on
//! first sight with `burst - 1` tokens (the first request is admitted) and
//! evicted by a periodic sweep once idle for longer than the TTL.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Idle time after which a bucket is evicted.
pub const DEFAULT_BUCKET_TTL: Duration = Duration::from_secs(5 * 60);

/// Interval between eviction sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// Clock
// =============================================================================

/// Time source for refill and eviction.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The monotonic system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move the clock forward. Clones share the same time.
    pub(crate) fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

// =============================================================================
// RateLimiter
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-key token bucket limiter.
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Create a limiter refilling `rate` tokens per second up to `burst`.
    ///
    /// A burst of zero is treated as one.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate: rate.max(0.0),
            burst: burst.max(1) as f64,
            ttl: DEFAULT_BUCKET_TTL,
            clock: Arc::new(SystemClock),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Change the idle eviction threshold.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Decide whether a request from `key` may proceed, consuming a token if so.
    pub fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock();

        let Some(bucket) = buckets.get_mut(key) else {
            buckets.insert(
                key.to_string(),
                Bucket {
                    tokens: self.burst - 1.0,
                    last_refill: now,
                },
            );
            return true;
        };

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return true;
        }
        drop(buckets);

        let prefix = key_prefix(key);
        debug!(key_prefix = %prefix, "Rate limit exceeded");
        counter!("heif_rate_limit_exceeded_total", "key_prefix" => prefix).increment(1);
        false
    }

    /// Remove buckets idle for longer than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.last_refill) <= self.ttl);
        before - buckets.len()
    }

    /// Run [`sweep`](Self::sweep) every `period` until the limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let removed = limiter.sweep();
                if removed > 0 {
                    debug!(removed, remaining = limiter.len(), "Swept idle rate limit buckets");
                }
            }
            debug!("Rate limiter dropped, sweeper exiting");
        })
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst as u32
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .field("ttl", &self.ttl)
            .field("keys", &self.len())
            .finish()
    }
}

/// Coarse, privacy-preserving label for a client key.
///
/// IPv4 keeps the first octet (`203.0.0.0`), IPv6 the first group (`2001:`).
/// Anything else becomes `unknown`.
pub fn key_prefix(key: &str) -> String {
    if let Ok(ip) = key.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(v4) => format!("{}.0.0.0", v4.octets()[0]),
            IpAddr::V6(v6) => format!("{:x}:", v6.segments()[0]),
        };
    }
    // host:port forms
    if let Some((host, _port)) = key.rsplit_once(':') {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return key_prefix(&ip.to_string());
        }
    }
    "unknown".to_string()
}

// =============================================================================
// Tests
// =============================================================================
