//! Tiered reusable byte buffers.
//!
//! Output buffers for encoded JPEGs vary from tens of kilobytes to several
//! megabytes. The pool keeps an independent free list per capacity tier:
//!
//! ```text
//!   get(size_hint) ──► smallest tier >= hint ──► pop free list or allocate
//!                                                   │
//!   drop(PooledBuffer) ──► capacity == a tier? ─yes─► clear, push free list
//!                                  │
//!                                  no ──► freed normally
//! ```
//!
//! A buffer that grew past its tier while in use no longer matches any tier
//! and is released to the allocator instead of being pooled.

use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use parking_lot::Mutex;

/// Capacity tiers in bytes: 64 KiB, 512 KiB, 5 MiB, 10 MiB.
pub const BUFFER_TIERS: [usize; 4] = [64 * 1024, 512 * 1024, 5 * 1024 * 1024, 10 * 1024 * 1024];

/// Default number of idle buffers kept per tier.
pub const DEFAULT_MAX_IDLE_PER_TIER: usize = 16;

struct Tier {
    capacity: usize,
    label: &'static str,
    free: Mutex<Vec<Vec<u8>>>,
}

/// Pool of reusable byte buffers with fixed capacity tiers.
pub struct BufferPool {
    tiers: Vec<Tier>,
    max_idle_per_tier: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    discarded: AtomicU64,
}

impl BufferPool {
    /// Create a pool with the default idle limit.
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE_PER_TIER)
    }

    /// Create a pool keeping at most `max_idle_per_tier` idle buffers per tier.
    pub fn with_max_idle(max_idle_per_tier: usize) -> Self {
        const LABELS: [&str; 4] = ["64k", "512k", "5m", "10m"];
        let tiers = BUFFER_TIERS
            .iter()
            .zip(LABELS)
            .map(|(&capacity, label)| Tier {
                capacity,
                label,
                free: Mutex::new(Vec::new()),
            })
            .collect();

        Self {
            tiers,
            max_idle_per_tier,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Borrow an empty buffer with capacity for at least `size_hint` bytes.
    ///
    /// Hints above the largest tier get an exact-size allocation that is not
    /// pooled on return.
    pub fn get(&self, size_hint: usize) -> PooledBuffer<'_> {
        let buf = match self.tiers.iter().find(|t| t.capacity >= size_hint) {
            Some(tier) => {
                let reused = tier.free.lock().pop();
                match reused {
                    Some(buf) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        counter!("heif_buffer_pool_hits_total", "tier" => tier.label).increment(1);
                        buf
                    }
                    None => {
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        counter!("heif_buffer_pool_misses_total", "tier" => tier.label)
                            .increment(1);
                        Vec::with_capacity(tier.capacity)
                    }
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("heif_buffer_pool_misses_total", "tier" => "oversize").increment(1);
                Vec::with_capacity(size_hint)
            }
        };

        PooledBuffer { buf, pool: self }
    }

    /// Return a buffer to the tier matching its exact capacity.
    ///
    /// Returns `false` if the buffer was not pooled, either because its
    /// capacity matches no tier or because the tier is already full.
    pub fn put(&self, mut buf: Vec<u8>) -> bool {
        let Some(tier) = self.tiers.iter().find(|t| t.capacity == buf.capacity()) else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        buf.clear();
        let mut free = tier.free.lock();
        if free.len() >= self.max_idle_per_tier {
            drop(free);
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        free.push(buf);
        true
    }

    /// Snapshot of pool counters.
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            idle: self
                .tiers
                .iter()
                .map(|t| (t.capacity, t.free.lock().len()))
                .collect(),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("max_idle_per_tier", &self.max_idle_per_tier)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Buffer pool statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Gets served from a free list
    pub hits: u64,
    /// Gets that allocated
    pub misses: u64,
    /// Returned buffers that were not pooled
    pub discarded: u64,
    /// `(tier capacity, idle buffers)` per tier
    pub idle: Vec<(usize, usize)>,
}

// =============================================================================
// PooledBuffer
// =============================================================================

/// A buffer borrowed from a [`BufferPool`], returned to it on drop.
pub struct PooledBuffer<'a> {
    buf: Vec<u8>,
    pool: &'a BufferPool,
}

impl PooledBuffer<'_> {
    /// Take the buffer out of the pool's custody. It will not be returned.
    pub fn into_inner(mut self) -> Vec<u8> {
        mem::take(&mut self.buf)
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        // Zero capacity means the buffer was detached with `into_inner`.
        if self.buf.capacity() > 0 {
            self.pool.put(mem::take(&mut self.buf));
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
