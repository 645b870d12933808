//! Test utilities for integration tests.
//!
//! Mock decoders, test images, multipart body builders and router helpers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use http_body_util::BodyExt;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, Rgb, RgbImage};
use parking_lot::{Condvar, Mutex};

use heif_converter::admission::{Admission, Clock, ConcurrencyLimiter, RateLimiter};
use heif_converter::codec::{DecoderSet, ImageCrateDecoder, ImageDecode, SourceFormat};
use heif_converter::convert::{Converter, WorkerPool};
use heif_converter::error::DecodeError;
use heif_converter::raster::{Frame, YcbcrFrame};
use heif_converter::server::{create_router, RouterConfig};

pub const BOUNDARY: &str = "heif-converter-test-boundary";

// =============================================================================
// Test Images
// =============================================================================

fn test_pattern(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x.wrapping_mul(7) % 256) as u8,
            (y.wrapping_mul(13) % 256) as u8,
            ((x ^ y) % 256) as u8,
        ])
    })
}

/// Encode a patterned RGB image as JPEG.
pub fn create_test_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 90)
        .encode_image(&test_pattern(width, height))
        .unwrap();
    buf
}

/// Encode a patterned RGB image as PNG.
pub fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    let img = test_pattern(width, height);
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

/// Rewrite the frame size declared in a JPEG's SOF0 header. The scan data is
/// untouched, so only a header read sees the new size.
pub fn with_declared_dimensions(mut jpeg: Vec<u8>, width: u16, height: u16) -> Vec<u8> {
    let mut pos = 2;
    while pos + 9 < jpeg.len() {
        assert_eq!(jpeg[pos], 0xFF, "not at a marker");
        let marker = jpeg[pos + 1];
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        if marker == 0xC0 {
            jpeg[pos + 5..pos + 7].copy_from_slice(&height.to_be_bytes());
            jpeg[pos + 7..pos + 9].copy_from_slice(&width.to_be_bytes());
            return jpeg;
        }
        pos += 2 + len;
    }
    panic!("no SOF0 segment");
}

/// Bytes that pass HEIF magic detection. Only a mock decoder can read them.
pub fn heif_payload() -> Vec<u8> {
    let mut data = vec![0x00, 0x00, 0x00, 0x18];
    data.extend_from_slice(b"ftypheic");
    data.extend_from_slice(b"\x00\x00\x00\x00mif1heic");
    data.extend_from_slice(&[0; 32]);
    data
}

/// Check for the JPEG SOI marker.
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 4 && data[0] == 0xFF && data[1] == 0xD8 && data[2] == 0xFF
}

/// Dimensions of an encoded JPEG.
pub fn jpeg_dimensions(data: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg).unwrap();
    (img.width(), img.height())
}

// =============================================================================
// Mock Decoders
// =============================================================================

/// Decodes every HEIF payload into a grey planar frame of fixed size.
pub struct SyntheticHeifDecoder {
    width: u32,
    height: u32,
}

impl SyntheticHeifDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl ImageDecode for SyntheticHeifDecoder {
    fn name(&self) -> &'static str {
        "synthetic-heif"
    }

    fn supports(&self, format: SourceFormat) -> bool {
        format == SourceFormat::Heif
    }

    fn dimensions(&self, _data: &[u8], _format: SourceFormat) -> Result<(u32, u32), DecodeError> {
        Ok((self.width, self.height))
    }

    fn decode(&self, _data: &[u8], _format: SourceFormat) -> Result<Frame, DecodeError> {
        Ok(Frame::Ycbcr(YcbcrFrame::new(self.width, self.height)))
    }
}

/// Holds decodes until opened, so tests control when workers are busy.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
    started: AtomicUsize,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Wait until `n` decodes have entered the gate.
    pub async fn wait_started(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.started() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("decodes never reached the gate");
    }
}

/// A HEIF decoder that blocks on a [`Gate`].
pub struct GatedDecoder {
    gate: Arc<Gate>,
}

impl GatedDecoder {
    pub fn new(gate: Arc<Gate>) -> Self {
        Self { gate }
    }
}

impl ImageDecode for GatedDecoder {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn supports(&self, format: SourceFormat) -> bool {
        format == SourceFormat::Heif
    }

    fn dimensions(&self, _data: &[u8], _format: SourceFormat) -> Result<(u32, u32), DecodeError> {
        Ok((64, 64))
    }

    fn decode(&self, _data: &[u8], _format: SourceFormat) -> Result<Frame, DecodeError> {
        self.gate.started.fetch_add(1, Ordering::SeqCst);
        let mut open = self.gate.open.lock();
        while !*open {
            self.gate.cond.wait(&mut open);
        }
        Ok(Frame::Ycbcr(YcbcrFrame::new(64, 64)))
    }
}

// =============================================================================
// Clock
// =============================================================================

/// A rate-limiter clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

// =============================================================================
// Pools and Routers
// =============================================================================

/// JPEG/PNG decoding through the image crate, synthetic 1920x1080 HEIF.
pub fn test_converter() -> Converter {
    Converter::new(500).with_decoders(
        DecoderSet::empty()
            .with(ImageCrateDecoder::new())
            .with(SyntheticHeifDecoder::new(1920, 1080)),
    )
}

/// A converter whose HEIF decodes wait on `gate`.
pub fn gated_converter(gate: &Arc<Gate>) -> Converter {
    Converter::new(500).with_decoders(DecoderSet::empty().with(GatedDecoder::new(gate.clone())))
}

pub fn test_pool(workers: usize, converter: Converter) -> Arc<WorkerPool> {
    let pool = Arc::new(WorkerPool::new(workers, converter));
    pool.start();
    pool
}

/// Admission that never rejects in practice.
pub fn open_admission() -> Admission {
    Admission::new(
        Arc::new(RateLimiter::new(10_000.0, 10_000)),
        ConcurrencyLimiter::new(1_000),
    )
}

pub fn test_router(pool: Arc<WorkerPool>, admission: Admission) -> Router {
    create_router(pool, admission, RouterConfig::new().with_tracing(false))
}

// =============================================================================
// Requests
// =============================================================================

/// Build a multipart body with a single file field.
pub fn multipart_body(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// `POST uri` with `data` uploaded as the `file` field.
pub fn convert_request(uri: &str, filename: &str, data: &[u8]) -> Request<Body> {
    convert_request_from(uri, filename, data, None)
}

/// Like [`convert_request`], with an `X-Forwarded-For` client address.
pub fn convert_request_from(
    uri: &str,
    filename: &str,
    data: &[u8],
    client: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(ip) = client {
        builder = builder.header("x-forwarded-for", ip);
    }
    builder
        .body(Body::from(multipart_body("file", filename, data)))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Collect a response body.
pub async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

/// Collect a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
