//! HTTP request handlers for the conversion API.
//!
//! # Endpoints
//!
//! - `POST /convert` - Convert an uploaded image to JPEG
//! - `GET /health` - Health check with worker pool statistics

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{multipart::MultipartRejection, Multipart, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::codec::{has_supported_extension, validate_file};
use crate::convert::{ConvertRequest, WorkerPool};
use crate::error::ConvertError;

/// Default downscale factor when the request does not name one.
pub const DEFAULT_SCALE: f64 = 0.5;

/// Default time a request may wait for its conversion.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Cache lifetime for converted images (one year).
const IMAGE_CACHE_CONTROL: &str = "public, max-age=31536000";

/// Multipart field carrying the upload.
const FILE_FIELD: &str = "file";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState {
    /// The worker pool every conversion goes through
    pub pool: Arc<WorkerPool>,

    /// Scale applied when the request has no usable `scale` parameter
    pub default_scale: f64,

    /// How long a request may wait for its conversion
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            default_scale: DEFAULT_SCALE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
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
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            default_scale: self.default_scale,
            request_timeout: self.request_timeout,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters for conversion requests.
///
/// Values are kept as strings so that a malformed parameter falls back to its
/// default instead of failing the request.
#[derive(Debug, Default, Deserialize)]
pub struct ConvertQueryParams {
    /// Downscale factor; `>= 1` means full resolution
    #[serde(default)]
    pub scale: Option<String>,

    /// Fixed JPEG quality 1-100; anything else selects adaptive quality
    #[serde(default)]
    pub quality: Option<String>,

    /// Adaptive target size in KB
    #[serde(default)]
    pub max_size: Option<String>,

    /// `json` for a base64 data URL, otherwise raw JPEG
    #[serde(default)]
    pub format: Option<String>,
}

impl ConvertQueryParams {
    /// The requested scale, or `default` when absent, unparsable or not positive.
    pub fn scale_or(&self, default: f64) -> f64 {
        self.scale
            .as_deref()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(default)
    }

    /// The raw quality hint, `-1` when absent or unparsable.
    pub fn quality_hint(&self) -> i32 {
        self.quality
            .as_deref()
            .and_then(|q| q.trim().parse::<i32>().ok())
            .unwrap_or(-1)
    }

    /// A positive target size override.
    pub fn target_size_kb(&self) -> Option<u32> {
        self.max_size
            .as_deref()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|kb| *kb > 0)
    }

    pub fn wants_json(&self) -> bool {
        self.format.as_deref() == Some("json")
    }

    /// Build the conversion request for `data`.
    pub fn to_request(&self, data: Bytes, default_scale: f64) -> ConvertRequest {
        let request =
            ConvertRequest::from_raw(data, self.scale_or(default_scale), self.quality_hint());
        match self.target_size_kb() {
            Some(kb) => request.with_target_size_kb(kb),
            None => request,
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "pool_busy", "invalid_input")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Build a JSON error response, optionally asking the client to retry in a second.
pub(crate) fn error_response(
    status: StatusCode,
    error_type: &str,
    message: String,
    retry_after: bool,
) -> Response {
    let body = Json(ErrorResponse::with_status(error_type, message, status));
    let mut response = (status, body).into_response();
    if retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    }
    response
}

/// Base64 response body for `format=json`.
#[derive(Debug, Serialize)]
pub struct ConvertJsonResponse {
    /// `data:image/jpeg;base64,...`
    pub data: String,
}

impl ConvertJsonResponse {
    pub fn from_jpeg(jpeg: &[u8]) -> Self {
        Self {
            data: format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg)),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Number of conversion workers
    pub workers: usize,

    /// Jobs waiting for a worker
    pub queue_depth: usize,

    /// Maximum number of waiting jobs
    pub queue_capacity: usize,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert ConvertError to HTTP response.
///
/// Server errors are logged at ERROR, client errors at WARN. Expected
/// rejections (busy queue, caller gone) are logged at DEBUG.
impl IntoResponse for ConvertError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ConvertError::InvalidInput { .. } => (StatusCode::BAD_REQUEST, "invalid_input"),
            ConvertError::UnsupportedFormat { .. } => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format")
            }
            ConvertError::InvalidDimensions { .. } => {
                (StatusCode::BAD_REQUEST, "invalid_dimensions")
            }
            ConvertError::FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "file_too_large"),
            ConvertError::ImageTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "image_too_large")
            }
            ConvertError::PoolBusy => (StatusCode::SERVICE_UNAVAILABLE, "pool_busy"),
            ConvertError::PoolStopped => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down"),
            ConvertError::Cancelled => (StatusCode::REQUEST_TIMEOUT, "cancelled"),
            ConvertError::DeadlineExceeded => (StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded"),
            ConvertError::EncodeFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "encode_failed")
            }
            ConvertError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let message = self.to_string();

        match &self {
            ConvertError::PoolBusy | ConvertError::Cancelled => {
                debug!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Conversion rejected: {}",
                    message
                );
            }
            _ if status.is_server_error() => {
                error!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Server error: {}",
                    message
                );
            }
            _ => {
                warn!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Client error: {}",
                    message
                );
            }
        }

        error_response(status, error_type, message, self.is_retryable())
    }
}

/// Errors raised by the convert handler itself.
#[derive(Debug)]
pub enum HandlerError {
    /// The conversion path failed
    Convert(ConvertError),

    /// The body is not a readable multipart form
    Multipart { status: StatusCode, message: String },

    /// No `file` field in the form
    MissingFile,

    /// The upload's filename has an extension we do not convert
    UnsupportedExtension { filename: String },
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            HandlerError::Convert(err) => return err.into_response(),
            HandlerError::Multipart { status, message } => {
                let error_type = if status == StatusCode::PAYLOAD_TOO_LARGE {
                    "request_too_large"
                } else {
                    "invalid_multipart"
                };
                (status, error_type, message)
            }
            HandlerError::MissingFile => (
                StatusCode::BAD_REQUEST,
                "missing_file",
                "No file provided".to_string(),
            ),
            HandlerError::UnsupportedExtension { filename } => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_extension",
                format!("Unsupported file extension: {:?}", filename),
            ),
        };

        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
        error_response(status, error_type, message, false)
    }
}

impl From<ConvertError> for HandlerError {
    fn from(err: ConvertError) -> Self {
        HandlerError::Convert(err)
    }
}

impl From<MultipartRejection> for HandlerError {
    fn from(rejection: MultipartRejection) -> Self {
        HandlerError::Multipart {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for HandlerError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        HandlerError::Multipart {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle conversion requests.
///
/// # Endpoint
///
/// `POST /convert` with a `multipart/form-data` body whose `file` field holds
/// a HEIF, JPEG or PNG image.
///
/// # Query Parameters
///
/// - `scale`: downscale factor (default from configuration, `>= 1` for full resolution)
/// - `quality`: JPEG quality 1-100 (default: adaptive)
/// - `max_size`: adaptive target size in KB
/// - `format`: `json` for a base64 data URL
///
/// # Response
///
/// - `200 OK`: `image/jpeg`, or JSON `{"data": "data:image/jpeg;base64,..."}`
/// - `400 Bad Request`: not multipart, no file, undecodable image
/// - `413 Payload Too Large`: file or image over the limits
/// - `415 Unsupported Media Type`: wrong extension or magic bytes
/// - `503 Service Unavailable`: queue full (`Retry-After: 1`)
/// - `504 Gateway Timeout`: conversion did not finish within the request timeout
pub async fn convert_handler(
    State(state): State<AppState>,
    Query(query): Query<ConvertQueryParams>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, HandlerError> {
    let data = read_upload(multipart?).await?;

    // Reject before taking a queue slot.
    validate_file(&data)?;

    let request = query.to_request(data, state.default_scale);
    debug!(
        bytes = request.data.len(),
        scale = request.scale,
        quality = ?request.quality,
        target_size_kb = ?request.target_size_kb,
        "Conversion requested"
    );

    // Cancels the job if the client disconnects and this future is dropped.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let jpeg = match tokio::time::timeout(
        state.request_timeout,
        state.pool.submit(&cancel, request),
    )
    .await
    {
        Ok(result) => result?,
        Err(_elapsed) => {
            cancel.cancel();
            return Err(ConvertError::DeadlineExceeded.into());
        }
    };

    if query.wants_json() {
        return Ok(Json(ConvertJsonResponse::from_jpeg(&jpeg)).into_response());
    }

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, IMAGE_CACHE_CONTROL),
        ],
        jpeg,
    )
        .into_response())
}

/// Pull the `file` field out of the form, checking its extension before
/// reading the body.
async fn read_upload(mut multipart: Multipart) -> Result<Bytes, HandlerError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if !has_supported_extension(&filename) {
            return Err(HandlerError::UnsupportedExtension { filename });
        }
        return Ok(field.bytes().await?);
    }
    Err(HandlerError::MissingFile)
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "workers": 10,
///   "queue_depth": 0,
///   "queue_capacity": 20
/// }
/// ```
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.pool.stats();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        workers: stats.workers,
        queue_depth: stats.queue_depth,
        queue_capacity: stats.queue_capacity,
    })
}

// =============================================================================
// Tests
// =============================================================================
