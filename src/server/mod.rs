//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │              POST /convert            GET /health               │
//! │                                                                 │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────────────┐ │
//! │  │  handlers   │  │  middleware  │  │        routes           │ │
//! │  │ (requests)  │  │ (admission)  │  │  (router config)        │ │
//! │  └─────────────┘  └──────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                   convert::WorkerPool::submit
//! ```

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use handlers::{
    convert_handler, health_handler, AppState, ConvertJsonResponse, ConvertQueryParams,
    ErrorResponse, HandlerError, HealthResponse, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SCALE,
};
pub use middleware::{admission_middleware, client_key, UNKNOWN_CLIENT};
pub use routes::{create_router, RouterConfig, DEFAULT_MAX_UPLOAD_BYTES};
