//! Configuration management for the conversion service.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `HEIF_` prefix:
//!
//! - `HEIF_HOST` - Server bind address (default: 0.0.0.0)
//! - `HEIF_PORT` - Server port (default: 8080)
//! - `HEIF_MAX_UPLOAD_MB` - Largest accepted request body (default: 10)
//! - `HEIF_TARGET_SIZE_KB` - Adaptive quality target size (default: 500)
//! - `HEIF_MAX_CONCURRENT` - Concurrent conversion requests (default: 50)
//! - `HEIF_RATE_LIMIT` - Per-client requests per second (default: 10)
//! - `HEIF_RATE_LIMIT_BURST` - Per-client burst (default: 20)
//! - `HEIF_WORKERS` - Conversion workers (default: 10)
//! - `HEIF_REQUEST_TIMEOUT_SECS` - Per-request conversion deadline (default: 60)
//! - `HEIF_DEFAULT_SCALE` - Scale used when a request names none (default: 0.5)

use std::time::Duration;

use clap::Parser;

use crate::convert::DEFAULT_TARGET_SIZE_KB;
use crate::server::DEFAULT_SCALE;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default upload limit in MiB.
pub const DEFAULT_MAX_UPLOAD_MB: usize = 10;

/// Default number of concurrent conversion requests.
pub const DEFAULT_MAX_CONCURRENT: usize = 50;

/// Default per-client refill rate (tokens per second).
pub const DEFAULT_RATE_LIMIT: u32 = 10;

/// Default per-client burst.
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 20;

/// Default number of conversion workers.
pub const DEFAULT_WORKERS: usize = 10;

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// CLI Arguments
// =============================================================================

/// HEIF converter - an image to JPEG conversion service.
///
/// Accepts HEIF/HEIC (and JPEG/PNG) uploads and returns size-targeted JPEGs,
/// with per-client rate limiting and a bounded worker pool.
#[derive(Parser, Debug, Clone)]
#[command(name = "heif-converter")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "HEIF_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "HEIF_PORT")]
    pub port: u16,

    /// Largest accepted request body in MiB.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_MB, env = "HEIF_MAX_UPLOAD_MB")]
    pub max_upload_mb: usize,

    /// Seconds a request may wait for its conversion before failing with 504.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS, env = "HEIF_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,

    // =========================================================================
    // Conversion Configuration
    // =========================================================================
    /// Target output size in KB for adaptive quality.
    #[arg(long, default_value_t = DEFAULT_TARGET_SIZE_KB, env = "HEIF_TARGET_SIZE_KB")]
    pub target_size_kb: u32,

    /// Number of conversion workers. The queue holds twice as many jobs.
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "HEIF_WORKERS")]
    pub workers: usize,

    /// Scale applied when a request has no `scale` parameter (0 < scale <= 1).
    #[arg(long, default_value_t = DEFAULT_SCALE, env = "HEIF_DEFAULT_SCALE")]
    pub default_scale: f64,

    // =========================================================================
    // Admission Configuration
    // =========================================================================
    /// Maximum number of conversion requests in flight.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT, env = "HEIF_MAX_CONCURRENT")]
    pub max_concurrent: usize,

    /// Requests per second allowed per client.
    #[arg(long, default_value_t = DEFAULT_RATE_LIMIT, env = "HEIF_RATE_LIMIT")]
    pub rate_limit: u32,

    /// Requests a client may make in a burst.
    #[arg(long, default_value_t = DEFAULT_RATE_LIMIT_BURST, env = "HEIF_RATE_LIMIT_BURST")]
    pub rate_limit_burst: u32,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_upload_mb == 0 {
            return Err("max_upload_mb must be greater than 0".to_string());
        }
        if self.target_size_kb == 0 {
            return Err("target_size_kb must be greater than 0".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".to_string());
        }
        if self.rate_limit == 0 {
            return Err("rate_limit must be greater than 0".to_string());
        }
        if self.rate_limit_burst == 0 {
            return Err("rate_limit_burst must be at least 1".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be greater than 0".to_string());
        }
        if !(self.default_scale > 0.0 && self.default_scale <= 1.0) {
            return Err(format!(
                "default_scale must be in (0, 1], got {}",
                self.default_scale
            ));
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The upload limit in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Tests
// =============================================================================
