//! Admission middleware for the conversion route.
//!
//! Every request is keyed by client address and passed through the shared
//! [`Admission`] gates before the handler runs. The concurrency permit lives
//! on this middleware's stack, so it is released once the inner service has
//! produced its response (or unwound).
//!
//! # Client Key
//!
//! The first of these that is present wins:
//!
//! 1. the first entry of `X-Forwarded-For`
//! 2. `X-Real-IP`
//! 3. the peer address from [`ConnectInfo`]
//! 4. `"unknown"`

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::handlers::error_response;
use crate::admission::Admission;
use crate::error::AdmissionError;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Key used when nothing identifies the client.
pub const UNKNOWN_CLIENT: &str = "unknown";

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            AdmissionError::RateLimited { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded")
            }
            AdmissionError::AtCapacity => (StatusCode::SERVICE_UNAVAILABLE, "at_capacity"),
        };
        let message = self.to_string();

        // Both are routine under load.
        match &self {
            AdmissionError::RateLimited { key_prefix } => {
                debug!(key_prefix = %key_prefix, status = status.as_u16(), "Request rate limited");
            }
            AdmissionError::AtCapacity => {
                debug!(status = status.as_u16(), "Request rejected at capacity");
            }
        }

        error_response(status, error_type, message, true)
    }
}

/// Rate limit and concurrency limit the wrapped routes.
///
/// Apply with `middleware::from_fn_with_state(admission, admission_middleware)`.
pub async fn admission_middleware(
    State(admission): State<Admission>,
    request: Request,
    next: Next,
) -> Result<Response, AdmissionError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer);

    let _permit = admission.admit(&key)?;
    Ok(next.run(request).await)
}

/// Identify the client a request came from.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
