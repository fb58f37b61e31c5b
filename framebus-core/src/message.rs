//! Protocol message kinds and payload types.
//!
//! # Wire protocol
//!
//! ```text
//! Consumer ──[Hello]─────────────────────────► Endpoint
//! Consumer ◄────────────────────[HelloAck]─── Endpoint
//!
//! One-shot retrieval (repeatable):
//! Consumer ──[Acquire]───────────────────────► Endpoint
//! Consumer ◄───────────────────[FrameReply]── Endpoint
//!
//! Push mode:
//! Consumer ──[Subscribe]─────────────────────► Endpoint
//! Consumer ◄─────────────────[SubscribeAck]── Endpoint
//! Consumer ◄──[Frame + STREAMING]──────────── Endpoint   (repeated)
//!
//! Shutdown:
//! Consumer ◄──[Bye + STOPPED]──────────────── Endpoint
//! ```
//!
//! Payloads are bincode-serialized structs; enums use proper
//! `TryFrom` — no panics on unknown values.

use serde::{Deserialize, Serialize};

use crate::codec::{Packet, PacketFlags};
use crate::error::BusError;
use crate::frame::PixelFormat;

/// Version of the wire protocol spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

// ── MessageKind ──────────────────────────────────────────────────

/// All message kinds understood by the bus protocol.
///
/// - `0x00xx` — connection-level (handshake, shutdown)
/// - `0x01xx` — frame retrieval and streaming
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    // ── Connection (0x00xx) ──────────────────────────────────────
    /// Consumer handshake: protocol version and identity.
    Hello = 0x0001,
    /// Endpoint handshake reply: endpoint identity.
    HelloAck = 0x0002,
    /// Graceful disconnect (either direction).
    Bye = 0x0003,

    // ── Frames (0x01xx) ──────────────────────────────────────────
    /// Request the most recently published frame.
    Acquire = 0x0101,
    /// Reply to `Acquire`; payload may describe an absent frame.
    FrameReply = 0x0102,
    /// Switch the connection to push mode.
    Subscribe = 0x0103,
    /// Acknowledge a subscription.
    SubscribeAck = 0x0104,
    /// A pushed frame (endpoint → subscriber).
    Frame = 0x0105,
}

impl TryFrom<u16> for MessageKind {
    type Error = BusError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(MessageKind::Hello),
            0x0002 => Ok(MessageKind::HelloAck),
            0x0003 => Ok(MessageKind::Bye),
            0x0101 => Ok(MessageKind::Acquire),
            0x0102 => Ok(MessageKind::FrameReply),
            0x0103 => Ok(MessageKind::Subscribe),
            0x0104 => Ok(MessageKind::SubscribeAck),
            0x0105 => Ok(MessageKind::Frame),
            _ => Err(BusError::UnknownVariant {
                type_name: "MessageKind",
                value: value as u64,
            }),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

// ── EndpointInfo ─────────────────────────────────────────────────

/// Identity a server reports during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointInfo {
    /// Public endpoint name.
    pub name: String,
    /// Process id of the publishing process.
    pub pid: u32,
    /// Protocol version the server speaks.
    pub protocol_version: u32,
    /// Unix timestamp (milliseconds) of endpoint start.
    pub started_unix_ms: u64,
}

impl EndpointInfo {
    pub fn to_bytes(&self) -> Result<Vec<u8>, BusError> {
        bincode::serialize(self).map_err(|e| BusError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BusError> {
        bincode::deserialize(bytes).map_err(|e| BusError::Encoding(e.to_string()))
    }
}

// ── Hello / HelloAck ─────────────────────────────────────────────

/// Consumer → endpoint handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hello {
    /// Protocol version the consumer speaks.
    pub protocol_version: u32,
    /// Free-form consumer identity, used only in logs.
    pub client: String,
}

impl Hello {
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            client: client.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BusError> {
        bincode::serialize(self).map_err(|e| BusError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BusError> {
        bincode::deserialize(bytes).map_err(|e| BusError::Encoding(e.to_string()))
    }

    pub fn into_packet(self, sequence: u64) -> Result<Packet, BusError> {
        Packet::new(
            MessageKind::Hello,
            PacketFlags::empty(),
            sequence,
            self.to_bytes()?,
        )
    }
}

/// Endpoint → consumer handshake reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelloAck {
    pub info: EndpointInfo,
}

impl HelloAck {
    pub fn to_bytes(&self) -> Result<Vec<u8>, BusError> {
        bincode::serialize(self).map_err(|e| BusError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BusError> {
        bincode::deserialize(bytes).map_err(|e| BusError::Encoding(e.to_string()))
    }

    pub fn into_packet(self, sequence: u64) -> Result<Packet, BusError> {
        Packet::new(
            MessageKind::HelloAck,
            PacketFlags::empty(),
            sequence,
            self.to_bytes()?,
        )
    }
}

// ── WireFrame ────────────────────────────────────────────────────

/// A published frame as it crosses the wire.
///
/// `data` holds the region's pixels, tightly packed, possibly
/// zstd-compressed (`compressed` flag).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireFrame {
    /// Publish sequence number (1-based).
    pub sequence: u64,
    /// Microseconds since the endpoint started.
    pub timestamp_us: u64,
    /// Published region width in pixels.
    pub width: u32,
    /// Published region height in pixels.
    pub height: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Vertical-flip orientation flag, carried verbatim to consumers.
    pub flipped: bool,
    /// Whether `data` is zstd-compressed.
    pub compressed: bool,
    /// Pixel payload.
    pub data: Vec<u8>,
}

impl WireFrame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, BusError> {
        bincode::serialize(self).map_err(|e| BusError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BusError> {
        bincode::deserialize(bytes).map_err(|e| BusError::Encoding(e.to_string()))
    }

    /// Build a streamed `Frame` packet.
    pub fn into_packet(self, sequence: u64) -> Result<Packet, BusError> {
        Packet::new(
            MessageKind::Frame,
            PacketFlags::STREAMING,
            sequence,
            self.to_bytes()?,
        )
    }
}

// ── FrameReply ───────────────────────────────────────────────────

/// Reply to an `Acquire` request. `frame` is `None` when nothing has
/// been published yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameReply {
    pub frame: Option<WireFrame>,
}

impl FrameReply {
    pub fn to_bytes(&self) -> Result<Vec<u8>, BusError> {
        bincode::serialize(self).map_err(|e| BusError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BusError> {
        bincode::deserialize(bytes).map_err(|e| BusError::Encoding(e.to_string()))
    }

    pub fn into_packet(self, sequence: u64) -> Result<Packet, BusError> {
        Packet::new(
            MessageKind::FrameReply,
            PacketFlags::empty(),
            sequence,
            self.to_bytes()?,
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────
