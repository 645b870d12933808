//! Router configuration for the conversion service.
//!
//! # Route Structure
//!
//! ```text
//! /health     - Health check (public)
//! /convert    - Conversion endpoint (rate and concurrency limited)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use heif_converter::admission::{Admission, ConcurrencyLimiter, RateLimiter};
//! use heif_converter::convert::{Converter, WorkerPool};
//! use heif_converter::server::{create_router, RouterConfig};
//!
//! let pool = Arc::new(WorkerPool::new(10, Converter::new(500)));
//! let admission = Admission::new(
//!     Arc::new(RateLimiter::new(10.0, 20)),
//!     ConcurrencyLimiter::new(50),
//! );
//!
//! let router = create_router(pool, admission, RouterConfig::new());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use super::handlers::{
    convert_handler, error_response, health_handler, AppState, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_SCALE,
};
use super::middleware::admission_middleware;
use crate::admission::Admission;
use crate::convert::WorkerPool;

/// Default upload limit (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Scale used when a request does not name one
    pub default_scale: f64,

    /// How long a request may wait for its conversion
    pub request_timeout: Duration,

    /// Largest accepted request body in bytes
    pub max_upload_bytes: usize,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Create a router configuration with defaults.
    ///
    /// By default:
    /// - Requests are downscaled by 0.5
    /// - Requests time out after 60 seconds
    /// - Uploads are limited to 10 MiB
    /// - Tracing is enabled
    pub fn new() -> Self {
        Self {
            default_scale: DEFAULT_SCALE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            enable_tracing: true,
        }
    }

    pub fn with_default_scale(mut self, scale: f64) -> Self {
        self.default_scale = scale;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the upload limit in bytes.
    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// - `/convert` goes through admission control, then the worker pool
/// - `/health` is always reachable
/// - handler panics become JSON 500 responses
pub fn create_router(pool: Arc<WorkerPool>, admission: Admission, config: RouterConfig) -> Router {
    let app_state = AppState::new(pool)
        .with_default_scale(config.default_scale)
        .with_request_timeout(config.request_timeout);

    // route_layer keeps admission off unmatched paths and 405s.
    let convert_routes = Router::new()
        .route("/convert", post(convert_handler))
        .route_layer(middleware::from_fn_with_state(
            admission,
            admission_middleware,
        ))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .with_state(app_state.clone());

    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .with_state(app_state);

    let router = Router::new()
        .merge(convert_routes)
        .merge(public_routes)
        .layer(CatchPanicLayer::custom(panic_response));

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "Handler panicked");

    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "Internal server error".to_string(),
        false,
    )
}

// =============================================================================
// Tests
// =============================================================================
