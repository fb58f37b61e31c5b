//! # framebus-core
//!
//! Machine-local frame bus: named GPU-frame publishing endpoints with
//! latest-frame retrieval from any process on the same host.
//!
//! This crate contains:
//! - **Frames**: `RawFrame`, `SharedFrame`, `Region`, `PixelFormat`
//! - **Device seam**: `GpuDevice` / `Texture` traits plus the CPU
//!   reference implementation
//! - **Codec**: `BusCodec` for framed TCP I/O via `tokio_util`
//! - **Messages**: hello exchange, acquire/reply, subscribe/push
//! - **Encode**: packed-pixel extraction and optional zstd compression
//! - **Registry**: per-endpoint records in the bus directory
//! - **Server**: `FrameServer` — a named publishing endpoint
//! - **Client**: `FrameClient` / `FrameStream` — the consumer side
//! - **Error**: `BusError` — typed, `thiserror`-based error hierarchy

pub mod client;
pub mod codec;
pub mod encode;
pub mod error;
pub mod frame;
pub mod message;
pub mod registry;
pub mod server;
pub mod state;
pub mod texture;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::{ClientStats, FrameClient, FrameStream};
pub use codec::{BusCodec, HEADER_SIZE, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, Packet, PacketFlags,
    PacketHeader};
pub use encode::{Compression, FrameDecoder, FrameEncoder};
pub use error::BusError;
pub use frame::{PixelFormat, RawFrame, Region, SharedFrame};
pub use message::{EndpointInfo, MessageKind, PROTOCOL_VERSION, WireFrame};
pub use registry::{EndpointRecord, default_dir, list_endpoints};
pub use server::{FrameServer, ServerOptions};
pub use state::EndpointPhase;
pub use texture::{CpuDevice, CpuTexture, GpuDevice, Texture};
