//! Frame and pixel types shared across the bus.
//!
//! [`RawFrame`] is the **internal** representation produced by a device
//! readback; it may carry row padding. [`SharedFrame`] is what consumers
//! receive: tightly packed pixels plus the metadata that was published
//! with them (region dimensions, orientation, sequence, timestamp).

use std::time::Instant;

use serde::{Deserialize, Serialize};

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for frame data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Bgra8 => write!(f, "bgra8"),
            PixelFormat::Rgba8 => write!(f, "rgba8"),
            PixelFormat::Rgb8 => write!(f, "rgb8"),
        }
    }
}

// ── Region ───────────────────────────────────────────────────────

/// A rectangular sub-region of a texture, in pixels.
///
/// `(x, y)` is the top-left corner in texture coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The full extent of a `width x height` texture.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// A zero-area region carries no pixels and is never publishable.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the region lies entirely inside a `width x height` texture.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = self.x as u64 + self.width as u64;
        let bottom = self.y as u64 + self.height as u64;
        right <= width as u64 && bottom <= height as u64
    }

    /// Area in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// An uncompressed pixel buffer read back from a texture region.
///
/// The `data` buffer holds `height` rows of `stride` bytes each.
/// `stride` may be larger than `width * bytes_per_pixel` due to
/// GPU row-alignment requirements (staging buffers commonly pad rows
/// to 256-byte boundaries).
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row pitch in **bytes** (may exceed `width * bpp`).
    pub stride: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Raw pixel data — `stride * height` bytes.
    pub data: Vec<u8>,
    /// Monotonic readback timestamp.
    pub timestamp: Instant,
}

impl RawFrame {
    /// Total byte size the raw bitmap occupies.
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// Returns a row slice (including possible padding bytes).
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride as usize;
        let end = start + self.stride as usize;
        &self.data[start..end]
    }

    /// Copy the pixels into a tightly packed buffer, stripping any
    /// per-row padding.
    pub fn packed(&self) -> Vec<u8> {
        let row_bytes = self.width as usize * self.format.bytes_per_pixel();
        if self.stride as usize == row_bytes {
            return self.data[..row_bytes * self.height as usize].to_vec();
        }
        let mut out = Vec::with_capacity(row_bytes * self.height as usize);
        for y in 0..self.height {
            out.extend_from_slice(&self.row(y)[..row_bytes]);
        }
        out
    }
}

// ── SharedFrame ──────────────────────────────────────────────────

/// The most recently published frame, as seen by a consumer.
///
/// Pixels are tightly packed (`width * bpp` bytes per row). When
/// `flipped` is set the rows are stored bottom-up; use
/// [`flipped_copy`](Self::flipped_copy) to obtain top-down rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedFrame {
    /// Publish sequence number (1-based, monotonically increasing).
    pub sequence: u64,
    /// Microseconds since the endpoint started publishing.
    pub timestamp_us: u64,
    /// Width of the published region in pixels.
    pub width: u32,
    /// Height of the published region in pixels.
    pub height: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Whether the rows are to be interpreted vertically mirrored.
    pub flipped: bool,
    /// Tightly packed pixel data.
    pub data: Vec<u8>,
}

impl SharedFrame {
    /// Total pixel byte size.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Returns a copy with the row order reversed and `flipped`
    /// toggled. Cheap way for consumers to normalise orientation.
    pub fn flipped_copy(&self) -> SharedFrame {
        let row_bytes = self.width as usize * self.format.bytes_per_pixel();
        let mut data = Vec::with_capacity(self.data.len());
        for row in self.data.chunks(row_bytes).rev() {
            data.extend_from_slice(row);
        }
        SharedFrame {
            flipped: !self.flipped,
            data,
            ..*self
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_bounds() {
        let r = Region::new(10, 20, 100, 50);
        assert!(r.fits_within(110, 70));
        assert!(!r.fits_within(109, 70));
        assert!(!r.fits_within(110, 69));
        assert!(!r.is_empty());
        assert_eq!(r.area(), 5000);
    }

    #[test]
    fn region_overflow_does_not_wrap() {
        let r = Region::new(u32::MAX, 0, 2, 2);
        assert!(!r.fits_within(u32::MAX, u32::MAX));
    }

    #[test]
    fn zero_area_region_is_empty() {
        assert!(Region::new(0, 0, 0, 10).is_empty());
        assert!(Region::new(0, 0, 10, 0).is_empty());
        assert!(!Region::full(1, 1).is_empty());
    }

    #[test]
    fn packed_strips_row_padding() {
        // 2x2 RGB8 frame with a stride of 8 (2 padding bytes per row).
        let raw = RawFrame {
            width: 2,
            height: 2,
            stride: 8,
            format: PixelFormat::Rgb8,
            data: vec![
                1, 2, 3, 4, 5, 6, 0xEE, 0xEE, //
                7, 8, 9, 10, 11, 12, 0xEE, 0xEE,
            ],
            timestamp: Instant::now(),
        };
        assert_eq!(raw.packed(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn packed_is_identity_without_padding() {
        let data: Vec<u8> = (0..16).collect();
        let raw = RawFrame {
            width: 2,
            height: 2,
            stride: 8,
            format: PixelFormat::Rgba8,
            data: data.clone(),
            timestamp: Instant::now(),
        };
        assert_eq!(raw.packed(), data);
    }

    #[test]
    fn flipped_copy_reverses_rows() {
        let frame = SharedFrame {
            sequence: 1,
            timestamp_us: 0,
            width: 1,
            height: 3,
            format: PixelFormat::Rgb8,
            flipped: false,
            data: vec![1, 1, 1, 2, 2, 2, 3, 3, 3],
        };
        let flipped = frame.flipped_copy();
        assert!(flipped.flipped);
        assert_eq!(flipped.data, vec![3, 3, 3, 2, 2, 2, 1, 1, 1]);
        // Flipping twice restores the original.
        assert_eq!(flipped.flipped_copy(), frame);
    }
}
