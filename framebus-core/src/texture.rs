//! Device and texture abstraction.
//!
//! The bus never talks to a GPU API directly. A publisher hands it a
//! [`Texture`] plus the [`GpuDevice`] that owns it, and the device
//! performs the region readback into CPU memory — the same
//! GPU-texture → staging-copy → CPU-rows shape a D3D11 or Metal
//! backend would implement behind these traits.
//!
//! [`CpuDevice`] / [`CpuTexture`] are the built-in memory-backed
//! implementation, used by the CLI test-pattern publisher and the
//! test suite.

use std::any::Any;
use std::time::Instant;

use crate::error::BusError;
use crate::frame::{PixelFormat, RawFrame, Region};

// ── Traits ───────────────────────────────────────────────────────

/// A GPU-resident (or memory-backed) image buffer handle.
pub trait Texture: Send + Sync {
    /// Width in pixels.
    fn width(&self) -> u32;
    /// Height in pixels.
    fn height(&self) -> u32;
    /// Pixel layout.
    fn format(&self) -> PixelFormat;
    /// Downcast support so a device can recognise its own textures.
    fn as_any(&self) -> &dyn Any;
}

/// A device context capable of reading texture regions back to CPU
/// memory.
///
/// `read_region` is synchronous by contract: when it returns, the
/// caller may reuse or destroy the texture.
pub trait GpuDevice: Send + Sync {
    /// Human-readable device identifier, used in logs and errors.
    fn label(&self) -> &str;

    /// Whether the device can currently service readbacks. Checked
    /// once at endpoint construction.
    fn is_usable(&self) -> bool {
        true
    }

    /// Read `region` of `texture` into a [`RawFrame`].
    ///
    /// Returns [`BusError::ForeignTexture`] when the texture was not
    /// created by this device.
    fn read_region(&self, texture: &dyn Texture, region: Region) -> Result<RawFrame, BusError>;
}

// ── CpuTexture ───────────────────────────────────────────────────

/// A memory-backed texture with an explicit row pitch.
#[derive(Clone)]
pub struct CpuTexture {
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl CpuTexture {
    /// Wrap a pixel buffer with an explicit `stride` (row pitch in
    /// bytes). Fails when the buffer is too small for the declared
    /// geometry or the stride cannot hold a full row.
    pub fn new(
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, BusError> {
        let row_bytes = width as usize * format.bytes_per_pixel();
        if (stride as usize) < row_bytes {
            return Err(BusError::Encoding(format!(
                "stride {stride} smaller than row size {row_bytes}"
            )));
        }
        let needed = stride as usize * height as usize;
        if data.len() < needed {
            return Err(BusError::Encoding(format!(
                "texture buffer too small: {} < {needed}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            format,
            data,
        })
    }

    /// Wrap a tightly packed pixel buffer (`stride == width * bpp`).
    pub fn from_packed(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, BusError> {
        let stride = width * format.bytes_per_pixel() as u32;
        Self::new(width, height, stride, format, data)
    }

    /// Replace the pixel contents in place. The buffer must match the
    /// existing geometry.
    pub fn update(&mut self, data: Vec<u8>) -> Result<(), BusError> {
        let needed = self.stride as usize * self.height as usize;
        if data.len() < needed {
            return Err(BusError::Encoding(format!(
                "texture buffer too small: {} < {needed}",
                data.len()
            )));
        }
        self.data = data;
        Ok(())
    }

    /// Row pitch in bytes.
    pub fn stride(&self) -> u32 {
        self.stride
    }
}

impl std::fmt::Debug for CpuTexture {
    // Elide the pixel buffer; only its size is useful in output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuTexture")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("data_len", &self.data.len())
            .finish()
    }
}

impl Texture for CpuTexture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> PixelFormat {
        self.format
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── CpuDevice ────────────────────────────────────────────────────

/// Memory-backed device: readback is a row-wise copy.
#[derive(Debug, Clone)]
pub struct CpuDevice {
    label: String,
}

impl CpuDevice {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new("cpu")
    }
}

impl GpuDevice for CpuDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn read_region(&self, texture: &dyn Texture, region: Region) -> Result<RawFrame, BusError> {
        let tex = texture
            .as_any()
            .downcast_ref::<CpuTexture>()
            .ok_or(BusError::ForeignTexture)?;

        if region.is_empty() || !region.fits_within(tex.width, tex.height) {
            return Err(BusError::InvalidRegion {
                region,
                width: tex.width,
                height: tex.height,
            });
        }

        let bpp = tex.format.bytes_per_pixel();
        let row_bytes = region.width as usize * bpp;
        let mut data = Vec::with_capacity(row_bytes * region.height as usize);

        for y in region.y..region.y + region.height {
            let row_start = y as usize * tex.stride as usize + region.x as usize * bpp;
            data.extend_from_slice(&tex.data[row_start..row_start + row_bytes]);
        }

        Ok(RawFrame {
            width: region.width,
            height: region.height,
            stride: row_bytes as u32,
            format: tex.format,
            data,
            timestamp: Instant::now(),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
