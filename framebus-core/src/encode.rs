//! Frame encoding and decoding.
//!
//! The publish path takes a [`RawFrame`] readback, strips row padding
//! and (optionally) zstd-compresses the pixels into a [`WireFrame`].
//! Consumers reverse the process into a [`SharedFrame`], validating
//! the declared geometry against the actual payload size.

use crate::codec::MAX_PAYLOAD_SIZE;
use crate::error::BusError;
use crate::frame::{RawFrame, SharedFrame};
use crate::message::WireFrame;

// ── Compression ──────────────────────────────────────────────────

/// Pixel payload compression applied by the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Raw pixels — no CPU cost, highest bandwidth.
    None,
    /// zstd at the given level (1 = fast / less compression,
    /// 19 = slow / max compression).
    Zstd { level: i32 },
}

impl Default for Compression {
    fn default() -> Self {
        // Favour speed: the encoder runs on the publisher's render path.
        Compression::Zstd { level: 1 }
    }
}

// ── FrameEncoder ─────────────────────────────────────────────────

/// Publisher-side frame encoder.
#[derive(Debug, Clone, Default)]
pub struct FrameEncoder {
    compression: Compression,
}

impl FrameEncoder {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }

    /// Encode a readback into a wire frame, stamping sequence number,
    /// timestamp and orientation.
    pub fn encode(
        &self,
        raw: &RawFrame,
        flipped: bool,
        sequence: u64,
        timestamp_us: u64,
    ) -> Result<WireFrame, BusError> {
        let packed = raw.packed();
        if packed.len() > MAX_PAYLOAD_SIZE {
            return Err(BusError::FrameTooLarge {
                size: packed.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let (data, compressed) = match self.compression {
            Compression::None => (packed, false),
            Compression::Zstd { level } => {
                let compressed = zstd::encode_all(packed.as_slice(), level)
                    .map_err(|e| BusError::Encoding(format!("zstd encode failed: {e}")))?;
                (compressed, true)
            }
        };

        Ok(WireFrame {
            sequence,
            timestamp_us,
            width: raw.width,
            height: raw.height,
            format: raw.format,
            flipped,
            compressed,
            data,
        })
    }
}

// ── FrameDecoder ─────────────────────────────────────────────────

/// Consumer-side frame decoder. Stateless.
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decompress and validate a wire frame.
    pub fn decode(&self, wire: &WireFrame) -> Result<SharedFrame, BusError> {
        let data = if wire.compressed {
            zstd::decode_all(wire.data.as_slice())
                .map_err(|e| BusError::Encoding(format!("zstd decode failed: {e}")))?
        } else {
            wire.data.clone()
        };

        let expected =
            wire.width as usize * wire.height as usize * wire.format.bytes_per_pixel();
        if data.len() != expected {
            return Err(BusError::Encoding(format!(
                "frame size mismatch: {}x{} {} needs {expected} bytes, got {}",
                wire.width,
                wire.height,
                wire.format,
                data.len()
            )));
        }

        Ok(SharedFrame {
            sequence: wire.sequence,
            timestamp_us: wire.timestamp_us,
            width: wire.width,
            height: wire.height,
            format: wire.format,
            flipped: wire.flipped,
            data,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
