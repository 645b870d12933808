//! Cheap checks applied before any decoding work.
//!
//! Size limits and magic bytes are checked on the raw payload so that
//! oversized or obviously wrong uploads never reach a decoder. Decoded
//! dimensions are checked before scaling or encoding.

use tracing::debug;

use crate::error::ConvertError;

/// Largest accepted payload.
pub const MAX_FILE_SIZE: usize = 20 * 1024 * 1024;

/// Largest accepted image width.
pub const MAX_IMAGE_WIDTH: u32 = 20_000;

/// Largest accepted image height.
pub const MAX_IMAGE_HEIGHT: u32 = 20_000;

/// Largest accepted total pixel count.
pub const MAX_IMAGE_PIXELS: u64 = 250_000_000;

/// Smallest accepted width or height.
pub const MIN_IMAGE_DIMENSION: u32 = 16;

/// Bytes needed to identify any supported container.
pub const MIN_HEADER_BYTES: usize = 12;

/// Known HEIF major brands.
const HEIF_BRANDS: &[&[u8; 4]] = &[b"heic", b"heim", b"heis", b"heix", b"mif1", b"msf1"];

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];

// =============================================================================
// SourceFormat
// =============================================================================

/// Container format of an uploaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    /// HEIF/HEIC (ISO base media file with a HEIF brand)
    Heif,

    /// JPEG/JFIF
    Jpeg,

    /// PNG
    Png,
}

impl SourceFormat {
    /// Human-readable name.
    pub const fn name(&self) -> &'static str {
        match self {
            SourceFormat::Heif => "HEIF",
            SourceFormat::Jpeg => "JPEG",
            SourceFormat::Png => "PNG",
        }
    }
}

/// Identify the container format from magic bytes.
///
/// HEIF files start with a 4-byte box size followed by `ftyp` and the major
/// brand. Any brand beginning with `he` is accepted alongside the known list.
pub fn detect_format(data: &[u8]) -> Option<SourceFormat> {
    if data.len() >= MIN_HEADER_BYTES && &data[4..8] == b"ftyp" {
        let brand = data[8..12].to_ascii_lowercase();
        let known = HEIF_BRANDS.iter().any(|b| b.as_slice() == brand.as_slice());
        if known || brand.starts_with(b"he") {
            return Some(SourceFormat::Heif);
        }
        return None;
    }
    if data.starts_with(PNG_MAGIC) {
        return Some(SourceFormat::Png);
    }
    if data.starts_with(JPEG_MAGIC) {
        return Some(SourceFormat::Jpeg);
    }
    None
}

/// Validate a raw upload and return its format.
///
/// Checks run in order: size limit, minimum length, magic bytes.
pub fn validate_file(data: &[u8]) -> Result<SourceFormat, ConvertError> {
    if data.len() > MAX_FILE_SIZE {
        debug!(size = data.len(), max = MAX_FILE_SIZE, "Rejecting oversized file");
        return Err(ConvertError::FileTooLarge {
            size: data.len(),
            max: MAX_FILE_SIZE,
        });
    }

    if data.len() < MIN_HEADER_BYTES {
        return Err(ConvertError::InvalidInput {
            reason: format!("file too small ({} bytes)", data.len()),
        });
    }

    detect_format(data).ok_or_else(|| ConvertError::UnsupportedFormat {
        reason: "unrecognized file signature".to_string(),
    })
}

/// Validate decoded image dimensions.
pub fn validate_dimensions(width: u32, height: u32) -> Result<(), ConvertError> {
    if width < MIN_IMAGE_DIMENSION || height < MIN_IMAGE_DIMENSION {
        debug!(width, height, min = MIN_IMAGE_DIMENSION, "Dimensions too small");
        return Err(ConvertError::InvalidDimensions { width, height });
    }

    if width > MAX_IMAGE_WIDTH || height > MAX_IMAGE_HEIGHT {
        debug!(width, height, "Dimensions exceed per-axis limit");
        return Err(ConvertError::ImageTooLarge { width, height });
    }

    if width as u64 * height as u64 > MAX_IMAGE_PIXELS {
        debug!(width, height, "Pixel count exceeds limit");
        return Err(ConvertError::ImageTooLarge { width, height });
    }

    Ok(())
}

/// Whether an upload's filename has an extension we accept.
pub fn has_supported_extension(filename: &str) -> bool {
    let Some((_, ext)) = filename.rsplit_once('.') else {
        return false;
    };
    matches!(
        ext.to_ascii_lowercase().as_str(),
        "heic" | "heif" | "jpg" | "jpeg" | "png"
    )
}

/// Conservative estimate of the encoded JPEG size in bytes.
///
/// Used to pre-size output buffers; it errs on the large side.
pub fn estimate_output_size(width: u32, height: u32, quality: u8) -> u64 {
    let pixels = width as u64 * height as u64;
    let multiplier = match quality {
        90.. => 2.0,
        70..=89 => 1.0,
        50..=69 => 0.5,
        _ => 0.3,
    };
    (pixels as f64 * multiplier) as u64
}

// =============================================================================
// Tests
// =============================================================================
