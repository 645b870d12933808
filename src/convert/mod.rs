//! Conversion execution: the converter pipeline, its worker pool, and the
//! buffer pool that backs encoder output.

pub mod buffer_pool;
pub mod converter;
pub mod pool;

pub use buffer_pool::{BufferPool, BufferPoolStats, PooledBuffer, BUFFER_TIERS};
pub use converter::{ConversionMode, ConvertRequest, Converter, DEFAULT_TARGET_SIZE_KB};
pub use pool::{
    Job, JobResult, PoolStats, WorkerPool, QUEUE_MULTIPLIER, RETRY_BASE_DELAY, RETRY_MAX_DELAY,
};
