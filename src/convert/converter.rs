//! The conversion function executed by pool workers.
//!
//! ```text
//! bytes ─► validate_file ─► header dimensions ─► validate_dimensions ─► decode
//!       ─► [scale] ─► quality ─► encode
//! ```
//!
//! Every step is synchronous and CPU-bound; workers run it on the blocking
//! thread pool.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::debug;

use super::buffer_pool::{BufferPool, BUFFER_TIERS};
use crate::codec::{
    estimate_output_size, is_valid_quality, validate_dimensions, validate_file, DecoderSet,
    EncoderChain,
};
use crate::error::{ConvertError, ErrorKind};
use crate::raster::{scale, QualityModel, FALLBACK_QUALITY};

/// Default target output size in kilobytes for adaptive quality.
pub const DEFAULT_TARGET_SIZE_KB: u32 = 500;

/// Largest buffer pre-size requested from the pool. Bigger outputs grow the
/// buffer on demand.
const MAX_PRESIZE: usize = BUFFER_TIERS[BUFFER_TIERS.len() - 1];

// =============================================================================
// ConvertRequest
// =============================================================================

/// Input for one conversion.
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    /// Raw uploaded bytes
    pub data: Bytes,

    /// Downscale factor. Values outside `(0, 1)` mean full resolution.
    pub scale: f64,

    /// Fixed JPEG quality, or `None` for adaptive estimation
    pub quality: Option<u8>,

    /// Per-request adaptive target, overriding the converter default
    pub target_size_kb: Option<u32>,
}

impl ConvertRequest {
    /// Full-resolution, adaptive-quality request.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            scale: 1.0,
            quality: None,
            target_size_kb: None,
        }
    }

    /// Build a request from loosely typed caller input.
    ///
    /// Quality hints outside `1..=100` (conventionally `-1`) select adaptive
    /// quality.
    pub fn from_raw(data: impl Into<Bytes>, scale: f64, quality_hint: i32) -> Self {
        let quality = u8::try_from(quality_hint).ok().filter(|q| is_valid_quality(*q));
        Self {
            data: data.into(),
            scale,
            quality,
            target_size_kb: None,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_target_size_kb(mut self, target_size_kb: u32) -> Self {
        self.target_size_kb = Some(target_size_kb);
        self
    }

    /// Whether this request asks for downscaling.
    pub fn is_scaled(&self) -> bool {
        self.scale.is_finite() && self.scale > 0.0 && self.scale < 1.0
    }
}

// =============================================================================
// ConversionMode
// =============================================================================

/// The four conversion variants, chosen from which of scale and quality are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMode {
    /// Full resolution, estimated quality
    Adaptive,
    /// Full resolution, caller quality
    FixedQuality,
    /// Downscaled, estimated quality
    Scaled,
    /// Downscaled, caller quality
    ScaledFixedQuality,
}

impl ConversionMode {
    pub fn select(request: &ConvertRequest) -> Self {
        match (request.is_scaled(), request.quality.is_some()) {
            (false, false) => ConversionMode::Adaptive,
            (false, true) => ConversionMode::FixedQuality,
            (true, false) => ConversionMode::Scaled,
            (true, true) => ConversionMode::ScaledFixedQuality,
        }
    }

    pub fn is_scaled(&self) -> bool {
        matches!(
            self,
            ConversionMode::Scaled | ConversionMode::ScaledFixedQuality
        )
    }

    /// Metric label.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConversionMode::Adaptive => "adaptive",
            ConversionMode::FixedQuality => "fixed_quality",
            ConversionMode::Scaled => "scaled",
            ConversionMode::ScaledFixedQuality => "scaled_fixed_quality",
        }
    }
}

// =============================================================================
// Converter
// =============================================================================

/// Decode, scale and encode pipeline.
#[derive(Debug, Clone)]
pub struct Converter {
    decoders: DecoderSet,
    encoders: EncoderChain,
    quality_model: QualityModel,
    target_size_kb: u32,
    buffers: Arc<BufferPool>,
}

impl Converter {
    /// A converter with the standard decoders and encoder.
    pub fn new(target_size_kb: u32) -> Self {
        Self {
            decoders: DecoderSet::standard(),
            encoders: EncoderChain::standard(),
            quality_model: QualityModel::default(),
            target_size_kb,
            buffers: Arc::new(BufferPool::new()),
        }
    }

    pub fn with_decoders(mut self, decoders: DecoderSet) -> Self {
        self.decoders = decoders;
        self
    }

    pub fn with_encoders(mut self, encoders: EncoderChain) -> Self {
        self.encoders = encoders;
        self
    }

    pub fn with_quality_model(mut self, model: QualityModel) -> Self {
        self.quality_model = model;
        self
    }

    pub fn with_buffer_pool(mut self, buffers: Arc<BufferPool>) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn target_size_kb(&self) -> u32 {
        self.target_size_kb
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffers
    }

    /// Run one conversion and record its outcome.
    pub fn convert(&self, request: &ConvertRequest) -> Result<Bytes, ConvertError> {
        let start = Instant::now();
        let mode = ConversionMode::select(request);

        let result = self.run(request, mode);

        let status = match &result {
            Ok(_) => "success",
            Err(err) => status_label(err),
        };
        counter!("heif_conversions_total", "status" => status).increment(1);
        histogram!("heif_conversion_duration_seconds", "mode" => mode.as_str())
            .record(start.elapsed().as_secs_f64());

        result
    }

    fn run(&self, request: &ConvertRequest, mode: ConversionMode) -> Result<Bytes, ConvertError> {
        let format = validate_file(&request.data)?;
        let (declared_width, declared_height) = self.decoders.dimensions(&request.data, format)?;
        validate_dimensions(declared_width, declared_height)?;

        let frame = self.decoders.decode(&request.data, format)?;
        // A decoder may disagree with its own header.
        validate_dimensions(frame.width(), frame.height())?;

        let src_dims = frame.dimensions();
        let frame = if mode.is_scaled() {
            scale(frame, request.scale)
        } else {
            frame
        };
        let (width, height) = frame.dimensions();

        let target_kb = request.target_size_kb.unwrap_or(self.target_size_kb);
        let quality = match request.quality {
            Some(q) => q,
            None => self
                .quality_model
                .estimate(width, height, target_kb)
                .unwrap_or(FALLBACK_QUALITY),
        };

        let presize = usize::try_from(estimate_output_size(width, height, quality))
            .unwrap_or(MAX_PRESIZE)
            .min(MAX_PRESIZE);
        let mut out = self.buffers.get(presize);
        let encoder = self.encoders.encode(&frame, quality, &mut out)?;

        debug!(
            format = format.name(),
            mode = mode.as_str(),
            src_width = src_dims.0,
            src_height = src_dims.1,
            width,
            height,
            quality,
            encoder,
            output_bytes = out.len(),
            "Converted image"
        );

        Ok(Bytes::copy_from_slice(&out))
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_SIZE_KB)
    }
}

fn status_label(err: &ConvertError) -> &'static str {
    match err.kind() {
        ErrorKind::InvalidInput => "invalid_input",
        ErrorKind::TooLarge => "too_large",
        ErrorKind::PoolBusy => "busy",
        ErrorKind::Cancelled => "cancelled",
        ErrorKind::EncodeFault => "encode_failed",
        ErrorKind::Internal => "internal",
    }
}

// =============================================================================
// Tests
// =============================================================================
