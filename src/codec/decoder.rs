//! Decode collaborators.
//!
//! The converter never parses image containers itself. It identifies the
//! format from magic bytes and hands the payload to the first installed
//! decoder that accepts that format.
//!
//! Decoders also report dimensions from the container header alone, so pixel
//! limits are enforced before any pixel buffer is allocated.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use image::{ImageFormat, ImageReader, Limits};
use tracing::debug;

use super::validation::{SourceFormat, MAX_IMAGE_HEIGHT, MAX_IMAGE_PIXELS, MAX_IMAGE_WIDTH};
use crate::error::{ConvertError, DecodeError};
use crate::raster::Frame;

/// A decoder for one or more source formats.
pub trait ImageDecode: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether this decoder handles `format`.
    fn supports(&self, format: SourceFormat) -> bool;

    /// Read `(width, height)` from the header without decoding pixels.
    fn dimensions(&self, data: &[u8], format: SourceFormat) -> Result<(u32, u32), DecodeError>;

    /// Decode `data`, already identified as `format`.
    fn decode(&self, data: &[u8], format: SourceFormat) -> Result<Frame, DecodeError>;
}

// =============================================================================
// ImageCrateDecoder
// =============================================================================

/// Allocation ceiling for one decode: the largest accepted image at four
/// bytes per pixel.
pub const MAX_DECODE_ALLOC: u64 = MAX_IMAGE_PIXELS * 4;

/// JPEG and PNG decoding through the `image` crate.
#[derive(Debug, Clone, Default)]
pub struct ImageCrateDecoder;

impl ImageCrateDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decoder limits matching the validation budget, so every image that
    /// passes `validate_dimensions` can be decoded.
    pub fn limits() -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(MAX_IMAGE_WIDTH);
        limits.max_image_height = Some(MAX_IMAGE_HEIGHT);
        limits.max_alloc = Some(MAX_DECODE_ALLOC);
        limits
    }

    fn reader(
        data: &[u8],
        format: SourceFormat,
    ) -> Result<ImageReader<Cursor<&[u8]>>, DecodeError> {
        let image_format = match format {
            SourceFormat::Jpeg => ImageFormat::Jpeg,
            SourceFormat::Png => ImageFormat::Png,
            SourceFormat::Heif => return Err(DecodeError::Unsupported(format.name().to_string())),
        };
        Ok(ImageReader::with_format(Cursor::new(data), image_format))
    }
}

impl ImageDecode for ImageCrateDecoder {
    fn name(&self) -> &'static str {
        "image"
    }

    fn supports(&self, format: SourceFormat) -> bool {
        matches!(format, SourceFormat::Jpeg | SourceFormat::Png)
    }

    fn dimensions(&self, data: &[u8], format: SourceFormat) -> Result<(u32, u32), DecodeError> {
        Self::reader(data, format)?
            .into_dimensions()
            .map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    fn decode(&self, data: &[u8], format: SourceFormat) -> Result<Frame, DecodeError> {
        let mut reader = Self::reader(data, format)?;
        reader.limits(Self::limits());

        let img = reader
            .decode()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        Ok(Frame::Rgb(img.to_rgb8()))
    }
}

// =============================================================================
// HeifDecoder
// =============================================================================

/// HEIF/HEIC decoding through libheif, producing planar 4:2:0 frames.
#[cfg(feature = "heif")]
pub struct HeifDecoder {
    lib: libheif_rs::LibHeif,
}

#[cfg(feature = "heif")]
impl HeifDecoder {
    pub fn new() -> Self {
        Self {
            lib: libheif_rs::LibHeif::new(),
        }
    }
}

#[cfg(feature = "heif")]
impl Default for HeifDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "heif")]
impl ImageDecode for HeifDecoder {
    fn name(&self) -> &'static str {
        "libheif"
    }

    fn supports(&self, format: SourceFormat) -> bool {
        format == SourceFormat::Heif
    }

    fn dimensions(&self, data: &[u8], _format: SourceFormat) -> Result<(u32, u32), DecodeError> {
        use libheif_rs::HeifContext;

        let malformed = |e: libheif_rs::HeifError| DecodeError::Malformed(e.to_string());
        let ctx = HeifContext::read_from_bytes(data).map_err(malformed)?;
        let handle = ctx.primary_image_handle().map_err(malformed)?;
        Ok((handle.width(), handle.height()))
    }

    fn decode(&self, data: &[u8], _format: SourceFormat) -> Result<Frame, DecodeError> {
        use crate::raster::YcbcrFrame;
        use libheif_rs::{Chroma, ColorSpace, HeifContext};

        let malformed = |e: libheif_rs::HeifError| DecodeError::Malformed(e.to_string());

        let ctx = HeifContext::read_from_bytes(data).map_err(malformed)?;
        let handle = ctx.primary_image_handle().map_err(malformed)?;
        let image = self
            .lib
            .decode(&handle, ColorSpace::YCbCr(Chroma::C420), None)
            .map_err(malformed)?;

        let planes = image.planes();
        let (Some(y), Some(cb), Some(cr)) = (planes.y, planes.cb, planes.cr) else {
            return Err(DecodeError::Malformed("missing YCbCr planes".to_string()));
        };
        if y.storage_bits_per_pixel != 8 {
            return Err(DecodeError::Unsupported(format!(
                "{}-bit HEIF",
                y.bits_per_pixel
            )));
        }
        if cb.stride != cr.stride {
            return Err(DecodeError::Malformed("chroma strides differ".to_string()));
        }

        YcbcrFrame::from_planes(
            y.width,
            y.height,
            y.data.to_vec(),
            y.stride,
            cb.data.to_vec(),
            cr.data.to_vec(),
            cb.stride,
        )
        .map(Frame::Ycbcr)
        .ok_or_else(|| DecodeError::Malformed("plane sizes do not match dimensions".to_string()))
    }
}

// =============================================================================
// DecoderSet
// =============================================================================

/// Ordered collection of decoders.
#[derive(Clone)]
pub struct DecoderSet {
    decoders: Vec<Arc<dyn ImageDecode>>,
}

impl DecoderSet {
    /// An empty set. Every decode fails with `UnsupportedFormat`.
    pub fn empty() -> Self {
        Self {
            decoders: Vec::new(),
        }
    }

    /// The decoders compiled into this build.
    pub fn standard() -> Self {
        let set = Self::empty().with(ImageCrateDecoder::new());
        #[cfg(feature = "heif")]
        let set = set.with(HeifDecoder::new());
        set
    }

    /// Append a decoder. Earlier decoders take priority.
    pub fn with<D: ImageDecode + 'static>(mut self, decoder: D) -> Self {
        self.decoders.push(Arc::new(decoder));
        self
    }

    /// Whether any installed decoder accepts `format`.
    pub fn supports(&self, format: SourceFormat) -> bool {
        self.decoders.iter().any(|d| d.supports(format))
    }

    /// Header dimensions from the first decoder that can read them.
    pub fn dimensions(
        &self,
        data: &[u8],
        format: SourceFormat,
    ) -> Result<(u32, u32), ConvertError> {
        let mut last_err = None;
        for decoder in self.decoders.iter().filter(|d| d.supports(format)) {
            match decoder.dimensions(data, format) {
                Ok(dims) => return Ok(dims),
                Err(err) => {
                    debug!(decoder = decoder.name(), error = %err, "Header read failed");
                    last_err = Some(err);
                }
            }
        }

        match last_err {
            Some(err) => Err(err.into()),
            None => Err(no_decoder(format)),
        }
    }

    /// Decode with the first decoder that succeeds.
    pub fn decode(&self, data: &[u8], format: SourceFormat) -> Result<Frame, ConvertError> {
        let mut last_err = None;
        for decoder in self.decoders.iter().filter(|d| d.supports(format)) {
            match decoder.decode(data, format) {
                Ok(frame) => {
                    debug!(
                        decoder = decoder.name(),
                        width = frame.width(),
                        height = frame.height(),
                        "Decoded image"
                    );
                    return Ok(frame);
                }
                Err(err) => {
                    debug!(decoder = decoder.name(), error = %err, "Decoder failed");
                    last_err = Some(err);
                }
            }
        }

        match last_err {
            Some(err) => Err(err.into()),
            None => Err(no_decoder(format)),
        }
    }
}

fn no_decoder(format: SourceFormat) -> ConvertError {
    ConvertError::UnsupportedFormat {
        reason: format!("no decoder installed for {}", format.name()),
    }
}

impl Default for DecoderSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for DecoderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.decoders.iter().map(|d| d.name()).collect();
        f.debug_struct("DecoderSet").field("decoders", &names).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
