//! Pixel-level processing: frame layouts, downscaling and quality estimation.
//!
//! - [`frame`]: RGB and planar 4:2:0 YCbCr frames with color conversion
//! - [`scale`]: fixed-point nearest-neighbour scaling into 4:2:0
//! - [`quality`]: JPEG quality estimation from a target size

pub mod frame;
pub mod quality;
pub mod scale;

pub use frame::{chroma_dimensions, Frame, YcbcrFrame};
pub use quality::{estimate_quality, QualityModel, FALLBACK_QUALITY, MAX_QUALITY, MIN_QUALITY};
pub use scale::{scale, scaled_dimensions, MIN_SCALED_DIMENSION};
