//! Nearest-neighbour downscaling into 4:2:0 planar frames.
//!
//! Index mapping uses 16.16 fixed-point ratios computed once per axis:
//!
//! ```text
//! ratio = (src_dim << 16) / dst_dim
//! src_x = (dst_x * ratio) >> 16
//! ```
//!
//! Luma and chroma are mapped independently, each with its own plane
//! dimensions, so odd-sized sources never index past a chroma plane.

use tracing::{debug, warn};

use super::frame::{chroma_dimensions, rgb_to_ycbcr, ChromaAccumulator, Frame, YcbcrFrame};
use image::RgbImage;

/// Smallest output width or height the scaler will produce.
pub const MIN_SCALED_DIMENSION: u32 = 100;

/// Output dimensions for a scale factor, with each side floored at
/// [`MIN_SCALED_DIMENSION`].
pub fn scaled_dimensions(width: u32, height: u32, factor: f64) -> (u32, u32) {
    let scale_side = |side: u32| -> u32 {
        let scaled = (side as f64 * factor).round();
        // `as` saturates for out-of-range floats.
        (scaled as u32).max(MIN_SCALED_DIMENSION)
    };
    (scale_side(width), scale_side(height))
}

/// Scale a frame by `factor`.
///
/// A factor of 1.0 or more, or a non-finite / non-positive factor, returns the
/// input unchanged without copying. Zero-sized or internally inconsistent
/// frames are also returned unchanged, with a warning.
pub fn scale(frame: Frame, factor: f64) -> Frame {
    if factor.is_nan() || factor <= 0.0 {
        debug!(factor, "Ignoring invalid scale factor");
        return frame;
    }
    if factor >= 1.0 {
        return frame;
    }

    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        warn!(width, height, "Refusing to scale empty frame");
        return frame;
    }
    if !frame.is_consistent() {
        warn!(width, height, "Frame planes do not match dimensions, skipping scale");
        return frame;
    }

    let (dst_w, dst_h) = scaled_dimensions(width, height, factor);
    debug!(
        src_width = width,
        src_height = height,
        dst_width = dst_w,
        dst_height = dst_h,
        layout = frame.layout_name(),
        "Scaling frame"
    );

    let scaled = match &frame {
        Frame::Ycbcr(src) => scale_ycbcr(src, dst_w, dst_h),
        Frame::Rgb(src) => scale_rgb(src, dst_w, dst_h),
    };
    Frame::Ycbcr(scaled)
}

/// Precomputed source index for each destination index along one axis.
fn axis_map(src: u32, dst: u32) -> Vec<usize> {
    let ratio = ((src as u64) << 16) / dst as u64;
    let last = src as usize - 1;
    (0..dst as u64)
        .map(|d| (((d * ratio) >> 16) as usize).min(last))
        .collect()
}

fn scale_ycbcr(src: &YcbcrFrame, dst_w: u32, dst_h: u32) -> YcbcrFrame {
    let mut dst = YcbcrFrame::new(dst_w, dst_h);

    let xs = axis_map(src.width, dst_w);
    let ys = axis_map(src.height, dst_h);
    for (dy, &sy) in ys.iter().enumerate() {
        let src_row = &src.y[sy * src.y_stride..];
        let dst_row = &mut dst.y[dy * dst.y_stride..dy * dst.y_stride + dst_w as usize];
        for (out, &sx) in dst_row.iter_mut().zip(&xs) {
            *out = src_row[sx];
        }
    }

    let (src_cw, src_ch) = src.chroma_dimensions();
    let (dst_cw, dst_ch) = chroma_dimensions(dst_w, dst_h);
    let cxs = axis_map(src_cw, dst_cw);
    let cys = axis_map(src_ch, dst_ch);
    for (dy, &sy) in cys.iter().enumerate() {
        let src_off = sy * src.c_stride;
        let dst_off = dy * dst.c_stride;
        for (dx, &sx) in cxs.iter().enumerate() {
            dst.cb[dst_off + dx] = src.cb[src_off + sx];
            dst.cr[dst_off + dx] = src.cr[src_off + sx];
        }
    }

    dst
}

/// Sample RGB at luma resolution, converting each sampled pixel inline and
/// averaging chroma over each 2x2 destination block.
fn scale_rgb(src: &RgbImage, dst_w: u32, dst_h: u32) -> YcbcrFrame {
    let mut dst = YcbcrFrame::new(dst_w, dst_h);
    let (dst_cw, _) = chroma_dimensions(dst_w, dst_h);
    let mut acc = ChromaAccumulator::new(dst.cb.len());

    let xs = axis_map(src.width(), dst_w);
    let ys = axis_map(src.height(), dst_h);
    for (dy, &sy) in ys.iter().enumerate() {
        let chroma_row = (dy / 2) * dst_cw as usize;
        for (dx, &sx) in xs.iter().enumerate() {
            let px = src.get_pixel(sx as u32, sy as u32);
            let (y, cb, cr) = rgb_to_ycbcr(px[0], px[1], px[2]);
            dst.y[dy * dst.y_stride + dx] = y;
            acc.add(chroma_row + dx / 2, cb, cr);
        }
    }
    acc.write_into(&mut dst.cb, &mut dst.cr);

    dst
}

// =============================================================================
// Tests
// =============================================================================
