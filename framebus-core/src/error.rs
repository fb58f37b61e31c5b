//! Domain-specific error types for the frame bus.
//!
//! All fallible operations return `Result<T, BusError>`.
//! No panics on invalid input — every error is typed and recoverable.

use std::time::Duration;
use thiserror::Error;

use crate::frame::Region;

/// The canonical error type for the frame bus.
#[derive(Debug, Error)]
pub enum BusError {
    // ── Endpoint Errors ──────────────────────────────────────────
    /// The endpoint name is empty, too long, or otherwise unusable.
    #[error("invalid endpoint name: {0}")]
    InvalidName(String),

    /// Another live server already publishes under this name.
    #[error("endpoint name already taken: {0:?}")]
    EndpointTaken(String),

    /// No live endpoint is registered under this name.
    #[error("endpoint not found: {0:?}")]
    EndpointNotFound(String),

    /// The device handed to the server cannot service readbacks.
    #[error("device unusable: {0}")]
    InvalidDevice(String),

    /// The texture was not created by the device bound to the endpoint.
    #[error("texture does not belong to this device")]
    ForeignTexture,

    /// The requested region does not fit inside the texture.
    #[error("region {region:?} does not fit texture {width}x{height}")]
    InvalidRegion {
        region: Region,
        width: u32,
        height: u32,
    },

    /// The endpoint has been stopped; no further operations are valid.
    #[error("endpoint is stopped")]
    Stopped,

    // ── Protocol Errors ──────────────────────────────────────────
    /// Received bytes that do not start with the FBUS magic sequence.
    #[error("invalid magic bytes: expected FBUS")]
    InvalidMagic,

    /// A field in the packet header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// The packet payload failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// The protocol version offered by the peer is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// A peer sent a message that is not valid in the current state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Packet Errors ────────────────────────────────────────────
    /// The payload exceeds the configured maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A published frame exceeds the transferable limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Connection / Registry Errors ─────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The endpoint registry directory or a record in it is broken.
    #[error("registry error: {0}")]
    Registry(String),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<Box<bincode::ErrorKind>> for BusError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        BusError::Encoding(e.to_string())
    }
}
