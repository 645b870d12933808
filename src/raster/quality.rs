//! JPEG quality estimation from a target output size.
//!
//! Output size grows roughly with the square of the quality setting, so the
//! estimate inverts that relationship in closed form instead of trial-encoding:
//!
//! ```text
//! ratio   = target_kb * 1024 / (pixels * COMPRESSION_FACTOR)
//! quality = 100 * sqrt(ratio)
//! ```
//!
//! Very large images compress better per pixel than the model predicts, so
//! they lose a few points; small images gain a few. The result is clamped to
//! `[MIN_QUALITY, MAX_QUALITY]`.

/// Lowest quality the estimator will return.
pub const MIN_QUALITY: u8 = 10;

/// Highest quality the estimator will return.
pub const MAX_QUALITY: u8 = 100;

/// Quality used when no estimate is possible.
pub const FALLBACK_QUALITY: u8 = 85;

/// Typical compressed bytes per pixel for photographic content at quality 100.
pub const COMPRESSION_FACTOR: f64 = 0.18;

/// Images above this pixel count get [`DENSITY_ADJUSTMENT`] subtracted.
pub const HIGH_DENSITY_PIXELS: u64 = 20_000_000;

/// Images below this pixel count get [`DENSITY_ADJUSTMENT`] added.
pub const LOW_DENSITY_PIXELS: u64 = 3_000_000;

/// Quality points applied for very large or very small images.
pub const DENSITY_ADJUSTMENT: f64 = 5.0;

/// Tunable parameters for [`QualityModel::estimate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityModel {
    pub compression_factor: f64,
    pub high_density_pixels: u64,
    pub low_density_pixels: u64,
    pub density_adjustment: f64,
}

impl Default for QualityModel {
    fn default() -> Self {
        Self {
            compression_factor: COMPRESSION_FACTOR,
            high_density_pixels: HIGH_DENSITY_PIXELS,
            low_density_pixels: LOW_DENSITY_PIXELS,
            density_adjustment: DENSITY_ADJUSTMENT,
        }
    }
}

impl QualityModel {
    /// Estimate a JPEG quality for an image so the output lands near
    /// `target_size_kb`.
    ///
    /// Returns `None` when either dimension or the target is zero. Otherwise
    /// the result is always in `[MIN_QUALITY, MAX_QUALITY]` and never
    /// increases as the pixel count grows for a fixed target.
    pub fn estimate(&self, width: u32, height: u32, target_size_kb: u32) -> Option<u8> {
        let pixels = width as u64 * height as u64;
        if pixels == 0 || target_size_kb == 0 {
            return None;
        }

        let target_bytes = target_size_kb as f64 * 1024.0;
        let ratio = target_bytes / (pixels as f64 * self.compression_factor);
        let mut quality = 100.0 * ratio.sqrt();

        if pixels > self.high_density_pixels {
            quality -= self.density_adjustment;
        } else if pixels < self.low_density_pixels {
            quality += self.density_adjustment;
        }

        if !quality.is_finite() {
            return Some(MAX_QUALITY);
        }
        let clamped = quality.clamp(MIN_QUALITY as f64, MAX_QUALITY as f64);
        Some(clamped as u8)
    }
}

/// Estimate quality with the default model.
pub fn estimate_quality(width: u32, height: u32, target_size_kb: u32) -> Option<u8> {
    QualityModel::default().estimate(width, height, target_size_kb)
}

// =============================================================================
// Tests
// =============================================================================
