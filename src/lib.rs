//! # HEIF Converter
//!
//! An image-to-JPEG conversion service: HEIF/HEIC (and JPEG/PNG) uploads in,
//! size-targeted JPEGs out.
//!
//! ## Features
//!
//! - **Bounded worker pool**: a fixed number of workers behind a queue that
//!   rejects immediately when full instead of piling up requests
//! - **Adaptive quality**: JPEG quality estimated in closed form from the
//!   target size, with no trial encodes
//! - **Chroma-aware downscaling**: nearest-neighbour scaling straight into
//!   planar 4:2:0
//! - **Admission control**: per-client token buckets plus a global cap on
//!   requests in flight
//! - **Encoder fault isolation**: a panicking or failing accelerated encoder
//!   falls back to the stable one
//!
//! ## Architecture
//!
//! - [`admission`] - Rate limiter and concurrency limiter
//! - [`convert`] - Converter pipeline, worker pool and buffer pool
//! - [`raster`] - Frames, scaling and quality estimation
//! - [`codec`] - Validation, decoders and encoders
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use heif_converter::{ConvertRequest, Converter, WorkerPool};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = WorkerPool::new(4, Converter::new(500));
//!     let upload = std::fs::read("photo.heic").unwrap();
//!
//!     let request = ConvertRequest::new(upload).with_scale(0.5);
//!     let jpeg = pool.submit(&CancellationToken::new(), request).await.unwrap();
//!     std::fs::write("photo.jpg", &jpeg).unwrap();
//!
//!     pool.stop().await;
//! }
//! ```

pub mod admission;
pub mod codec;
pub mod config;
pub mod convert;
pub mod error;
pub mod raster;
pub mod server;

// Re-export commonly used types
pub use admission::{Admission, ConcurrencyLimiter, ConcurrencyPermit, RateLimiter};
pub use codec::{DecoderSet, EncoderChain, ImageDecode, JpegEncode, SourceFormat};
pub use config::Config;
pub use convert::{
    BufferPool, ConversionMode, ConvertRequest, Converter, PooledBuffer, WorkerPool,
};
pub use error::{AdmissionError, ConvertError, DecodeError, EncodeError, ErrorKind};
pub use raster::{estimate_quality, scale, Frame, YcbcrFrame};
pub use server::{create_router, AppState, RouterConfig};
