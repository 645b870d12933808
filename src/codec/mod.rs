//! Codec collaborators and pre-decode validation.
//!
//! - [`validation`]: size limits, magic bytes and dimension checks
//! - [`decoder`]: [`ImageDecode`] implementations and the [`DecoderSet`]
//! - [`encoder`]: [`JpegEncode`] implementations and the guarded [`EncoderChain`]

pub mod decoder;
pub mod encoder;
pub mod validation;

#[cfg(feature = "heif")]
pub use decoder::HeifDecoder;
#[cfg(feature = "turbojpeg")]
pub use encoder::TurboJpegEncoder;
pub use decoder::{DecoderSet, ImageCrateDecoder, ImageDecode};
pub use encoder::{
    clamp_quality, is_valid_quality, EncoderChain, ImageJpegEncoder, JpegEncode,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use validation::{
    detect_format, estimate_output_size, has_supported_extension, validate_dimensions,
    validate_file, SourceFormat,
};
