//! Bounded worker pool for conversions.
//!
//! ```text
//!   submit() ──try_send──► [ bounded queue: workers * 2 ] ──recv──► worker 0..N
//!      │    Full => PoolBusy                                          │
//!      │                                                 spawn_blocking(convert)
//!      ◄──────────────────── oneshot reply ◄─────────────────────────┘
//! ```
//!
//! Enqueue never waits: a full queue is reported to the caller immediately as
//! [`ConvertError::PoolBusy`]. Each job carries a oneshot sender as its reply
//! slot; a worker whose caller has gone away drops the result and moves on.
//!
//! [`WorkerPool::stop`] closes the queue and waits for workers to finish
//! every job already queued.

use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender, TrySendError};
use bytes::Bytes;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::converter::{ConvertRequest, Converter};
use crate::error::ConvertError;

/// Queue slots per worker.
pub const QUEUE_MULTIPLIER: usize = 2;

/// First backoff delay for [`WorkerPool::submit_with_retry`].
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(10);

/// Upper bound on a single backoff delay.
pub const RETRY_MAX_DELAY: Duration = Duration::from_millis(500);

/// Outcome of one conversion job.
pub type JobResult = Result<Bytes, ConvertError>;

/// A queued conversion and the slot its result goes to.
pub struct Job {
    pub request: ConvertRequest,
    pub reply: oneshot::Sender<JobResult>,
    pub enqueued_at: Instant,
}

enum PoolState {
    NotStarted,
    Running(Vec<JoinHandle<()>>),
    Stopped,
}

impl PoolState {
    fn name(&self) -> &'static str {
        match self {
            PoolState::NotStarted => "not_started",
            PoolState::Running(_) => "running",
            PoolState::Stopped => "stopped",
        }
    }
}

/// Fixed-size pool of conversion workers behind a bounded queue.
pub struct WorkerPool {
    converter: Arc<Converter>,
    workers: usize,
    jobs_tx: Sender<Job>,
    jobs_rx: Receiver<Job>,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    /// Create a pool with `workers` workers (at least one) and a queue of
    /// `workers * QUEUE_MULTIPLIER` slots. Workers start on first use.
    pub fn new(workers: usize, converter: Converter) -> Self {
        let workers = workers.max(1);
        let (jobs_tx, jobs_rx) = async_channel::bounded(workers * QUEUE_MULTIPLIER);
        Self {
            converter: Arc::new(converter),
            workers,
            jobs_tx,
            jobs_rx,
            state: Mutex::new(PoolState::NotStarted),
        }
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    /// Spawn the workers. Idempotent; a stopped pool stays stopped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if !matches!(*state, PoolState::NotStarted) {
            return;
        }

        let handles = (0..self.workers)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    self.converter.clone(),
                    self.jobs_rx.clone(),
                ))
            })
            .collect();
        *state = PoolState::Running(handles);

        info!(
            workers = self.workers,
            queue_capacity = self.queue_capacity(),
            "Worker pool started"
        );
    }

    /// Queue a conversion and wait for its result.
    ///
    /// Returns [`ConvertError::PoolBusy`] at once if the queue is full and
    /// [`ConvertError::Cancelled`] as soon as `cancel` fires, whether or not a
    /// worker has picked the job up.
    pub async fn submit(
        &self,
        cancel: &CancellationToken,
        request: ConvertRequest,
    ) -> Result<Bytes, ConvertError> {
        self.start();

        if cancel.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }

        let (reply, result_rx) = oneshot::channel();
        let job = Job {
            request,
            reply,
            enqueued_at: Instant::now(),
        };

        match self.jobs_tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                counter!("heif_worker_pool_busy_total").increment(1);
                debug!(queue_depth = self.jobs_tx.len(), "Worker pool queue full");
                return Err(ConvertError::PoolBusy);
            }
            Err(TrySendError::Closed(_)) => return Err(ConvertError::PoolStopped),
        }
        gauge!("heif_worker_pool_queue_size").set(self.jobs_tx.len() as f64);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Caller cancelled while job pending");
                Err(ConvertError::Cancelled)
            }
            reply = result_rx => match reply {
                Ok(result) => result,
                Err(_) => Err(ConvertError::Internal {
                    message: "worker dropped job without replying".to_string(),
                }),
            },
        }
    }

    /// [`submit`](Self::submit), retrying on [`ConvertError::PoolBusy`].
    ///
    /// Makes at most `max_attempts` attempts (at least one), sleeping between
    /// busy outcomes with a doubling delay starting at [`RETRY_BASE_DELAY`]
    /// and capped at [`RETRY_MAX_DELAY`]. Any other outcome is returned at
    /// once. Backoff sleeps end early on cancellation.
    pub async fn submit_with_retry(
        &self,
        cancel: &CancellationToken,
        request: ConvertRequest,
        max_attempts: u32,
    ) -> Result<Bytes, ConvertError> {
        let attempts = max_attempts.max(1);
        let mut delay = RETRY_BASE_DELAY;

        for attempt in 1..=attempts {
            match self.submit(cancel, request.clone()).await {
                Err(ConvertError::PoolBusy) if attempt < attempts => {
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Worker pool busy, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ConvertError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = (delay * 2).min(RETRY_MAX_DELAY);
                }
                Err(ConvertError::PoolBusy) => {
                    warn!(attempts, "Worker pool still busy after retries");
                    return Err(ConvertError::PoolBusy);
                }
                other => return other,
            }
        }

        Err(ConvertError::PoolBusy)
    }

    /// Close the queue and wait for workers to drain it.
    ///
    /// Jobs already queued are completed. Later submissions fail with
    /// [`ConvertError::PoolStopped`]. Calling `stop` again returns at once.
    pub async fn stop(&self) {
        let handles = {
            let mut state = self.state.lock();
            match mem::replace(&mut *state, PoolState::Stopped) {
                PoolState::Running(handles) => handles,
                PoolState::NotStarted | PoolState::Stopped => Vec::new(),
            }
        };
        self.jobs_tx.close();

        if handles.is_empty() {
            return;
        }

        info!(
            queued = self.jobs_tx.len(),
            "Stopping worker pool, draining queue"
        );
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Worker task ended abnormally");
            }
        }
        gauge!("heif_worker_pool_queue_size").set(0.0);
        info!("Worker pool stopped");
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs currently waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.jobs_tx.len()
    }

    /// Maximum number of queued jobs.
    pub fn queue_capacity(&self) -> usize {
        self.jobs_tx.capacity().unwrap_or(self.workers * QUEUE_MULTIPLIER)
    }

    /// Snapshot of pool state.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            state: self.state.lock().name(),
            workers: self.workers,
            queue_depth: self.queue_depth(),
            queue_capacity: self.queue_capacity(),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Worker pool statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// `not_started`, `running` or `stopped`
    pub state: &'static str,
    pub workers: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
}

async fn run_worker(worker_id: usize, converter: Arc<Converter>, jobs: Receiver<Job>) {
    debug!(worker_id, "Worker started");

    while let Ok(job) = jobs.recv().await {
        gauge!("heif_worker_pool_queue_size").set(jobs.len() as f64);

        let Job {
            request,
            reply,
            enqueued_at,
        } = job;
        let waited = enqueued_at.elapsed();

        let converter = converter.clone();
        let result = match tokio::task::spawn_blocking(move || converter.convert(&request)).await {
            Ok(result) => result,
            Err(err) => {
                error!(worker_id, error = %err, "Conversion task failed");
                Err(ConvertError::Internal {
                    message: format!("conversion task failed: {}", err),
                })
            }
        };

        debug!(
            worker_id,
            queued_ms = waited.as_millis() as u64,
            ok = result.is_ok(),
            "Job finished"
        );

        if reply.send(result).is_err() {
            debug!(worker_id, "Caller stopped waiting, result dropped");
        }
    }

    debug!(worker_id, "Worker exiting");
}

// =============================================================================
// Tests
// =============================================================================
