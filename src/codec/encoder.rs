//! JPEG encode collaborators.
//!
//! [`EncoderChain`] runs an optional accelerated primary encoder inside an
//! unwind boundary. If the primary panics or reports an error, the output
//! buffer is cleared and the stable fallback encoder runs instead. Only a
//! fallback failure reaches the caller.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use metrics::counter;
use tracing::warn;

use crate::error::{ConvertError, EncodeError};
use crate::raster::Frame;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// A JPEG encoder.
pub trait JpegEncode: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Append the JPEG encoding of `frame` to `out`.
    fn encode(&self, frame: &Frame, quality: u8, out: &mut Vec<u8>) -> Result<(), EncodeError>;
}

// =============================================================================
// ImageJpegEncoder
// =============================================================================

/// Baseline JPEG encoding through the `image` crate.
#[derive(Debug, Clone, Default)]
pub struct ImageJpegEncoder;

impl ImageJpegEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl JpegEncode for ImageJpegEncoder {
    fn name(&self) -> &'static str {
        "image"
    }

    fn encode(&self, frame: &Frame, quality: u8, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let rgb = frame.to_rgb();
        let mut encoder = JpegEncoder::new_with_quality(&mut *out, clamp_quality(quality));
        encoder
            .encode_image(&*rgb)
            .map_err(|e| EncodeError::Failed {
                encoder: self.name(),
                message: e.to_string(),
            })
    }
}

// =============================================================================
// TurboJpegEncoder
// =============================================================================

/// libjpeg-turbo encoding with 4:2:0 chroma subsampling.
#[cfg(feature = "turbojpeg")]
#[derive(Debug, Clone, Default)]
pub struct TurboJpegEncoder;

#[cfg(feature = "turbojpeg")]
impl TurboJpegEncoder {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "turbojpeg")]
impl JpegEncode for TurboJpegEncoder {
    fn name(&self) -> &'static str {
        "turbojpeg"
    }

    fn encode(&self, frame: &Frame, quality: u8, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        use turbojpeg::{Compressor, Image, PixelFormat, Subsamp};

        let failed = |e: turbojpeg::Error| EncodeError::Failed {
            encoder: "turbojpeg",
            message: e.to_string(),
        };

        let rgb = frame.to_rgb();
        let (width, height) = rgb.dimensions();
        let image = Image {
            pixels: rgb.as_raw().as_slice(),
            width: width as usize,
            pitch: width as usize * 3,
            height: height as usize,
            format: PixelFormat::RGB,
        };

        // Compressor handles are not shareable across threads.
        let mut compressor = Compressor::new().map_err(failed)?;
        compressor
            .set_quality(i32::from(clamp_quality(quality)))
            .map_err(failed)?;
        compressor.set_subsamp(Subsamp::Sub2x2).map_err(failed)?;
        let jpeg = compressor.compress_to_vec(image).map_err(failed)?;

        out.extend_from_slice(&jpeg);
        Ok(())
    }
}

// =============================================================================
// EncoderChain
// =============================================================================

/// Primary encoder with a guarded fallback.
#[derive(Clone)]
pub struct EncoderChain {
    primary: Option<Arc<dyn JpegEncode>>,
    fallback: Arc<dyn JpegEncode>,
}

impl EncoderChain {
    /// A chain with no primary; every encode goes straight to `fallback`.
    pub fn new<F: JpegEncode + 'static>(fallback: F) -> Self {
        Self {
            primary: None,
            fallback: Arc::new(fallback),
        }
    }

    /// The encoders compiled into this build: libjpeg-turbo as primary when
    /// the `turbojpeg` feature is on, the `image` encoder as fallback.
    pub fn standard() -> Self {
        let chain = Self::new(ImageJpegEncoder::new());
        #[cfg(feature = "turbojpeg")]
        let chain = chain.with_primary(TurboJpegEncoder::new());
        chain
    }

    /// Name of the installed primary encoder, if any.
    pub fn primary_name(&self) -> Option<&'static str> {
        self.primary.as_ref().map(|p| p.name())
    }

    /// Install an accelerated primary encoder.
    pub fn with_primary<P: JpegEncode + 'static>(mut self, primary: P) -> Self {
        self.primary = Some(Arc::new(primary));
        self
    }

    /// Encode `frame` into `out`, which is cleared first.
    ///
    /// Returns the name of the encoder that produced the output.
    pub fn encode(
        &self,
        frame: &Frame,
        quality: u8,
        out: &mut Vec<u8>,
    ) -> Result<&'static str, ConvertError> {
        out.clear();
        let quality = clamp_quality(quality);

        if let Some(primary) = &self.primary {
            let attempt =
                panic::catch_unwind(AssertUnwindSafe(|| primary.encode(frame, quality, out)));
            match attempt {
                Ok(Ok(())) => return Ok(primary.name()),
                Ok(Err(err)) => {
                    warn!(
                        encoder = primary.name(),
                        error = %err,
                        "Primary encoder failed, using fallback"
                    );
                }
                Err(payload) => {
                    let err = EncodeError::Fault {
                        encoder: primary.name(),
                        message: panic_message(payload.as_ref()),
                    };
                    warn!(error = %err, "Primary encoder faulted, using fallback");
                    counter!("heif_encoder_faults_total", "encoder" => primary.name()).increment(1);
                }
            }
            out.clear();
        }

        self.fallback
            .encode(frame, quality, out)
            .map(|()| self.fallback.name())
            .map_err(|e| ConvertError::EncodeFailed {
                message: e.to_string(),
            })
    }
}

impl Default for EncoderChain {
    fn default() -> Self {
        Self::new(ImageJpegEncoder::new())
    }
}

impl fmt::Debug for EncoderChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderChain")
            .field("primary", &self.primary.as_ref().map(|p| p.name()))
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
