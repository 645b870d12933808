//! Decoded pixel representations.
//!
//! Decoders hand the converter either an interleaved RGB image or a planar
//! YCbCr image with 4:2:0 chroma subsampling. The scaling engine always
//! produces the planar form, which is also what JPEG stores internally.

use std::borrow::Cow;

use image::{Rgb, RgbImage};

// =============================================================================
// Color Conversion
// =============================================================================

/// Convert an RGB pixel to full-range (JFIF) YCbCr using 16.16 fixed point.
#[inline]
pub fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);

    let y = (19595 * r + 38470 * g + 7471 * b + (1 << 15)) >> 16;
    let cb = (-11056 * r - 21712 * g + 32768 * b + (128 << 16) + (1 << 15)) >> 16;
    let cr = (32768 * r - 27440 * g - 5328 * b + (128 << 16) + (1 << 15)) >> 16;

    (clamp_u8(y), clamp_u8(cb), clamp_u8(cr))
}

/// Convert a full-range (JFIF) YCbCr pixel back to RGB.
#[inline]
pub fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> (u8, u8, u8) {
    let yy = ((y as i32) << 16) + (1 << 15);
    let cb = cb as i32 - 128;
    let cr = cr as i32 - 128;

    let r = (yy + 91881 * cr) >> 16;
    let g = (yy - 22554 * cb - 46802 * cr) >> 16;
    let b = (yy + 116130 * cb) >> 16;

    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Chroma plane dimensions for a 4:2:0 image of the given luma size.
///
/// Odd luma dimensions round up, so every luma pixel has a chroma sample.
#[inline]
pub const fn chroma_dimensions(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(2), height.div_ceil(2))
}

// =============================================================================
// YcbcrFrame
// =============================================================================

/// Planar YCbCr image with 4:2:0 chroma subsampling.
///
/// The luma plane is `width x height`; each chroma plane is
/// `ceil(width/2) x ceil(height/2)`. Rows may be padded, so all indexing goes
/// through the plane strides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YcbcrFrame {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) y: Vec<u8>,
    pub(crate) y_stride: usize,
    pub(crate) cb: Vec<u8>,
    pub(crate) cr: Vec<u8>,
    pub(crate) c_stride: usize,
}

impl YcbcrFrame {
    /// Create a black image with tightly packed planes.
    pub fn new(width: u32, height: u32) -> Self {
        let (cw, ch) = chroma_dimensions(width, height);
        let chroma_len = cw as usize * ch as usize;
        Self {
            width,
            height,
            y: vec![0; width as usize * height as usize],
            y_stride: width as usize,
            cb: vec![128; chroma_len],
            cr: vec![128; chroma_len],
            c_stride: cw as usize,
        }
    }

    /// Wrap existing planes, checking that they are large enough for the
    /// declared dimensions and strides.
    ///
    /// Returns `None` if any plane is too short or a stride is narrower than
    /// its plane's width.
    pub fn from_planes(
        width: u32,
        height: u32,
        y: Vec<u8>,
        y_stride: usize,
        cb: Vec<u8>,
        cr: Vec<u8>,
        c_stride: usize,
    ) -> Option<Self> {
        let frame = Self {
            width,
            height,
            y,
            y_stride,
            cb,
            cr,
            c_stride,
        };
        frame.is_consistent().then_some(frame)
    }

    /// Build a 4:2:0 frame from an RGB image, averaging chroma over 2x2 blocks.
    pub fn from_rgb(rgb: &RgbImage) -> Self {
        let (width, height) = rgb.dimensions();
        let mut frame = Self::new(width, height);
        let (cw, ch) = chroma_dimensions(width, height);
        let mut acc = ChromaAccumulator::new(cw as usize * ch as usize);

        for (x, yy, px) in rgb.enumerate_pixels() {
            let (y, cb, cr) = rgb_to_ycbcr(px[0], px[1], px[2]);
            frame.y[yy as usize * frame.y_stride + x as usize] = y;
            acc.add((yy / 2) as usize * cw as usize + (x / 2) as usize, cb, cr);
        }
        acc.write_into(&mut frame.cb, &mut frame.cr);
        frame
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Luma plane.
    pub fn y_plane(&self) -> &[u8] {
        &self.y
    }

    /// Blue-difference chroma plane.
    pub fn cb_plane(&self) -> &[u8] {
        &self.cb
    }

    /// Red-difference chroma plane.
    pub fn cr_plane(&self) -> &[u8] {
        &self.cr
    }

    pub fn y_stride(&self) -> usize {
        self.y_stride
    }

    pub fn c_stride(&self) -> usize {
        self.c_stride
    }

    /// Dimensions of each chroma plane.
    pub fn chroma_dimensions(&self) -> (u32, u32) {
        chroma_dimensions(self.width, self.height)
    }

    /// Luma sample at `(x, y)`.
    pub fn luma_at(&self, x: u32, y: u32) -> u8 {
        self.y[y as usize * self.y_stride + x as usize]
    }

    /// Chroma samples `(cb, cr)` at chroma-plane coordinates `(cx, cy)`.
    pub fn chroma_at(&self, cx: u32, cy: u32) -> (u8, u8) {
        let idx = cy as usize * self.c_stride + cx as usize;
        (self.cb[idx], self.cr[idx])
    }

    /// Check that plane buffers cover the declared geometry.
    pub fn is_consistent(&self) -> bool {
        let (cw, ch) = self.chroma_dimensions();
        let luma_ok = plane_fits(self.y.len(), self.y_stride, self.width, self.height);
        let cb_ok = plane_fits(self.cb.len(), self.c_stride, cw, ch);
        let cr_ok = plane_fits(self.cr.len(), self.c_stride, cw, ch);
        luma_ok && cb_ok && cr_ok
    }

    /// Convert to interleaved RGB.
    pub fn to_rgb(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let (cb, cr) = self.chroma_at(x / 2, y / 2);
            let (r, g, b) = ycbcr_to_rgb(self.luma_at(x, y), cb, cr);
            Rgb([r, g, b])
        })
    }
}

fn plane_fits(len: usize, stride: usize, width: u32, height: u32) -> bool {
    if height == 0 || width == 0 {
        return true;
    }
    if stride < width as usize {
        return false;
    }
    // The last row only needs `width` bytes, not a full stride.
    let needed = (height as usize - 1) * stride + width as usize;
    len >= needed
}

/// Running sums for averaging chroma over 2x2 luma blocks.
pub(crate) struct ChromaAccumulator {
    cb: Vec<u32>,
    cr: Vec<u32>,
    count: Vec<u8>,
}

impl ChromaAccumulator {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            cb: vec![0; len],
            cr: vec![0; len],
            count: vec![0; len],
        }
    }

    #[inline]
    pub(crate) fn add(&mut self, idx: usize, cb: u8, cr: u8) {
        self.cb[idx] += cb as u32;
        self.cr[idx] += cr as u32;
        self.count[idx] += 1;
    }

    /// Write rounded averages into tightly packed chroma planes.
    pub(crate) fn write_into(&self, cb_out: &mut [u8], cr_out: &mut [u8]) {
        for (idx, &n) in self.count.iter().enumerate() {
            if n == 0 {
                continue;
            }
            let n = n as u32;
            cb_out[idx] = ((self.cb[idx] + n / 2) / n) as u8;
            cr_out[idx] = ((self.cr[idx] + n / 2) / n) as u8;
        }
    }
}

// =============================================================================
// Frame
// =============================================================================

/// A decoded image ready for scaling and encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Interleaved 8-bit RGB
    Rgb(RgbImage),

    /// Planar YCbCr with 4:2:0 chroma subsampling
    Ycbcr(YcbcrFrame),
}

impl Frame {
    pub fn width(&self) -> u32 {
        match self {
            Frame::Rgb(img) => img.width(),
            Frame::Ycbcr(img) => img.width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Frame::Rgb(img) => img.height(),
            Frame::Ycbcr(img) => img.height,
        }
    }

    /// `(width, height)` in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// Total pixel count.
    pub fn pixel_count(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Whether the pixel buffers match the declared dimensions.
    pub fn is_consistent(&self) -> bool {
        match self {
            // RgbImage enforces its own buffer length at construction.
            Frame::Rgb(_) => true,
            Frame::Ycbcr(img) => img.is_consistent(),
        }
    }

    /// Interleaved RGB view, converting planar frames on demand.
    pub fn to_rgb(&self) -> Cow<'_, RgbImage> {
        match self {
            Frame::Rgb(img) => Cow::Borrowed(img),
            Frame::Ycbcr(img) => Cow::Owned(img.to_rgb()),
        }
    }

    /// Short label for logs.
    pub fn layout_name(&self) -> &'static str {
        match self {
            Frame::Rgb(_) => "rgb",
            Frame::Ycbcr(_) => "ycbcr420",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
