use thiserror::Error;

/// Broad classification of conversion failures.
///
/// Callers use the kind to decide between retrying, reporting a client error,
/// or reporting a server error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or undecodable payload, wrong magic bytes, degenerate dimensions
    InvalidInput,
    /// File size or pixel count exceeds configured limits
    TooLarge,
    /// The worker queue is at capacity
    PoolBusy,
    /// The caller stopped waiting (cancellation or deadline)
    Cancelled,
    /// Both the accelerated and the fallback encoder failed
    EncodeFault,
    /// Anything else (pool shut down, worker task lost)
    Internal,
}

/// Errors returned by the conversion path.
#[derive(Debug, Clone, Error)]
pub enum ConvertError {
    /// Payload could not be decoded or is structurally invalid
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Payload is not a format any installed decoder accepts (should map to HTTP 415)
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    /// Decoded image has zero or too small dimensions
    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Raw payload exceeds the file size limit
    #[error("File too large: {size} bytes (max: {max})")]
    FileTooLarge { size: usize, max: usize },

    /// Decoded image exceeds the width, height or pixel count limits
    #[error("Image dimensions exceed maximum allowed: {width}x{height}")]
    ImageTooLarge { width: u32, height: u32 },

    /// The job queue is full; retry later
    #[error("Worker pool is busy, please retry later")]
    PoolBusy,

    /// The pool has been stopped and accepts no more jobs
    #[error("Worker pool is stopped")]
    PoolStopped,

    /// The caller cancelled while the job was queued or running
    #[error("Conversion cancelled")]
    Cancelled,

    /// The caller's deadline elapsed while the job was queued or running
    #[error("Conversion deadline exceeded")]
    DeadlineExceeded,

    /// Encoding failed on every available encoder
    #[error("Encoding failed: {message}")]
    EncodeFailed { message: String },

    /// Unexpected internal failure
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ConvertError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::InvalidInput { .. }
            | ConvertError::UnsupportedFormat { .. }
            | ConvertError::InvalidDimensions { .. } => ErrorKind::InvalidInput,
            ConvertError::FileTooLarge { .. } | ConvertError::ImageTooLarge { .. } => {
                ErrorKind::TooLarge
            }
            ConvertError::PoolBusy => ErrorKind::PoolBusy,
            ConvertError::Cancelled | ConvertError::DeadlineExceeded => ErrorKind::Cancelled,
            ConvertError::EncodeFailed { .. } => ErrorKind::EncodeFault,
            ConvertError::PoolStopped | ConvertError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the same request later.
    ///
    /// Only queue saturation is transient; conversion errors are deterministic
    /// for a given input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConvertError::PoolBusy)
    }
}

impl From<DecodeError> for ConvertError {
    fn from(err: DecodeError) -> Self {
        ConvertError::InvalidInput {
            reason: err.to_string(),
        }
    }
}

/// Errors from a decode collaborator.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The bitstream is corrupt or truncated
    #[error("Malformed image data: {0}")]
    Malformed(String),

    /// The decoder does not handle this format
    #[error("Format not supported by decoder: {0}")]
    Unsupported(String),
}

/// Errors from an encode collaborator.
#[derive(Debug, Clone, Error)]
pub enum EncodeError {
    /// The encoder reported a failure
    #[error("{encoder} encoder failed: {message}")]
    Failed {
        encoder: &'static str,
        message: String,
    },

    /// The encoder panicked and was isolated
    #[error("{encoder} encoder faulted: {message}")]
    Fault {
        encoder: &'static str,
        message: String,
    },
}

/// Reasons a request is turned away before reaching the worker pool.
#[derive(Debug, Clone, Error)]
pub enum AdmissionError {
    /// The client's token bucket is empty
    #[error("Rate limit exceeded")]
    RateLimited { key_prefix: String },

    /// Every concurrency slot is taken
    #[error("Service busy, please try again")]
    AtCapacity,
}
