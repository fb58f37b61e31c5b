//! Packet framing for bus connections.
//!
//! Every message crosses the wire as a single framed packet:
//!
//! ```text
//! PacketHeader (24 bytes, little-endian):
//!   magic:        u32  (4)  "FBUS"
//!   checksum:     u32  (4)  first 4 bytes of blake3(payload); 0 if empty
//!   kind:         u16  (2)  MessageKind discriminant
//!   flags:        u16  (2)  PacketFlags bits
//!   sequence:     u64  (8)  per-connection packet counter
//!   payload_len:  u32  (4)
//! payload: [u8; payload_len]
//! ```
//!
//! [`BusCodec`] implements `tokio_util::codec::{Encoder, Decoder}` so a
//! connection is just `Framed::new(stream, BusCodec::new())`.

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::BusError;
use crate::message::MessageKind;

// ── Constants ────────────────────────────────────────────────────

/// Packet magic, "FBUS" in little-endian byte order.
pub const MAGIC: u32 = u32::from_le_bytes(*b"FBUS");

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = 24;

/// Upper bound on a single payload. Large enough for an uncompressed
/// 4K BGRA frame with headroom.
pub const MAX_PAYLOAD_SIZE: usize = 128 * 1024 * 1024;

/// Upper bound on a full frame (header + payload).
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

// ── PacketFlags ──────────────────────────────────────────────────

bitflags! {
    /// Per-packet modifier bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketFlags: u16 {
        /// Part of a continuous push stream (server → subscriber).
        const STREAMING = 0b0000_0001;
        /// The endpoint is stopping; no more packets will follow.
        const STOPPED   = 0b0000_0010;
    }
}

// ── PacketHeader ─────────────────────────────────────────────────

/// Fixed-size header preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub checksum: u32,
    pub kind: u16,
    pub flags: PacketFlags,
    pub sequence: u64,
    pub payload_len: u32,
}

impl PacketHeader {
    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..10].copy_from_slice(&self.kind.to_le_bytes());
        buf[10..12].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[12..20].copy_from_slice(&self.sequence.to_le_bytes());
        buf[20..24].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// Deserialize from bytes, validating magic and payload bound.
    pub fn decode(data: &[u8]) -> Result<Self, BusError> {
        if data.len() < HEADER_SIZE {
            return Err(BusError::InvalidHeader("header too short"));
        }
        let magic = u32::from_le_bytes(data[0..4].try_into().expect("sliced"));
        if magic != MAGIC {
            return Err(BusError::InvalidMagic);
        }
        let header = Self {
            checksum: u32::from_le_bytes(data[4..8].try_into().expect("sliced")),
            kind: u16::from_le_bytes(data[8..10].try_into().expect("sliced")),
            flags: PacketFlags::from_bits_retain(u16::from_le_bytes(
                data[10..12].try_into().expect("sliced"),
            )),
            sequence: u64::from_le_bytes(data[12..20].try_into().expect("sliced")),
            payload_len: u32::from_le_bytes(data[20..24].try_into().expect("sliced")),
        };
        if header.payload_len as usize > MAX_PAYLOAD_SIZE {
            return Err(BusError::PayloadTooLarge {
                size: header.payload_len as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(header)
    }
}

// ── Packet ───────────────────────────────────────────────────────

/// A framed protocol message: header plus payload bytes.
#[derive(Debug, Clone)]
pub struct Packet {
    header: PacketHeader,
    payload: Vec<u8>,
}

impl Packet {
    /// Build a packet, computing the payload checksum.
    pub fn new(
        kind: MessageKind,
        flags: PacketFlags,
        sequence: u64,
        payload: Vec<u8>,
    ) -> Result<Self, BusError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(BusError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let checksum = if payload.is_empty() {
            0
        } else {
            checksum_of(&payload)
        };
        Ok(Self {
            header: PacketHeader {
                checksum,
                kind: kind as u16,
                flags,
                sequence,
                payload_len: payload.len() as u32,
            },
            payload,
        })
    }

    /// A payload-less packet (handshake acks, acquire, bye…).
    pub fn control(kind: MessageKind, flags: PacketFlags, sequence: u64) -> Self {
        Self {
            header: PacketHeader {
                checksum: 0,
                kind: kind as u16,
                flags,
                sequence,
                payload_len: 0,
            },
            payload: Vec::new(),
        }
    }

    pub fn kind(&self) -> Result<MessageKind, BusError> {
        MessageKind::try_from(self.header.kind)
    }

    pub fn flags(&self) -> PacketFlags {
        self.header.flags
    }

    pub fn sequence(&self) -> u64 {
        self.header.sequence
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Verify the payload against the header checksum.
    pub fn verify(&self) -> bool {
        if self.payload.is_empty() {
            self.header.checksum == 0
        } else {
            self.header.checksum == checksum_of(&self.payload)
        }
    }
}

/// First 4 bytes of the blake3 hash, little-endian.
fn checksum_of(payload: &[u8]) -> u32 {
    let hash = blake3::hash(payload);
    u32::from_le_bytes(hash.as_bytes()[0..4].try_into().expect("hash is 32 bytes"))
}

// ── BusCodec ─────────────────────────────────────────────────────

/// Framed codec for bus connections.
#[derive(Debug, Default)]
pub struct BusCodec;

impl BusCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for BusCodec {
    type Item = Packet;
    type Error = BusError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = PacketHeader::decode(&src[..HEADER_SIZE])?;
        let total = HEADER_SIZE + header.payload_len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(header.payload_len as usize).to_vec();

        let packet = Packet { header, payload };
        if !packet.verify() {
            return Err(BusError::ChecksumMismatch);
        }
        // Reject unknown kinds early so peers fail loudly.
        packet.kind()?;
        Ok(Some(packet))
    }
}

impl Encoder<Packet> for BusCodec {
    type Error = BusError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HEADER_SIZE + item.payload.len());
        dst.put_slice(&item.header.encode());
        dst.put_slice(&item.payload);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let hdr = PacketHeader {
            checksum: 0xDEAD_BEEF,
            kind: MessageKind::Frame as u16,
            flags: PacketFlags::STREAMING,
            sequence: 42,
            payload_len: 1000,
        };
        let bytes = hdr.encode();
        let decoded = PacketHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn bad_magic_rejected() {
        let hdr = PacketHeader {
            checksum: 0,
            kind: 1,
            flags: PacketFlags::empty(),
            sequence: 0,
            payload_len: 0,
        };
        let mut bytes = hdr.encode();
        bytes[0] = b'X';
        assert!(matches!(
            PacketHeader::decode(&bytes),
            Err(BusError::InvalidMagic)
        ));
    }

    #[test]
    fn oversized_payload_rejected() {
        let hdr = PacketHeader {
            checksum: 0,
            kind: 1,
            flags: PacketFlags::empty(),
            sequence: 0,
            payload_len: (MAX_PAYLOAD_SIZE + 1) as u32,
        };
        let bytes = hdr.encode();
        assert!(matches!(
            PacketHeader::decode(&bytes),
            Err(BusError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn codec_roundtrip() {
        let mut codec = BusCodec::new();
        let packet = Packet::new(
            MessageKind::Frame,
            PacketFlags::STREAMING,
            7,
            vec![1, 2, 3, 4, 5],
        )
        .unwrap();

        let mut buf = BytesMut::new();
        codec.encode(packet.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().expect("complete packet");
        assert_eq!(decoded.kind().unwrap(), MessageKind::Frame);
        assert_eq!(decoded.sequence(), 7);
        assert_eq!(decoded.payload(), &[1, 2, 3, 4, 5]);
        assert!(decoded.flags().contains(PacketFlags::STREAMING));
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_incremental_decode() {
        let mut codec = BusCodec::new();
        let packet = Packet::new(
            MessageKind::Hello,
            PacketFlags::empty(),
            1,
            vec![9; 64],
        )
        .unwrap();

        let mut full = BytesMut::new();
        codec.encode(packet, &mut full).unwrap();

        // Feed the bytes one at a time; only the last byte completes
        // the packet.
        let mut partial = BytesMut::new();
        let total = full.len();
        for (i, byte) in full.iter().enumerate() {
            partial.put_u8(*byte);
            let result = codec.decode(&mut partial).unwrap();
            if i + 1 < total {
                assert!(result.is_none(), "completed early at byte {i}");
            } else {
                assert!(result.is_some());
            }
        }
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut codec = BusCodec::new();
        let packet =
            Packet::new(MessageKind::Frame, PacketFlags::empty(), 1, vec![1, 2, 3]).unwrap();

        let mut buf = BytesMut::new();
        codec.encode(packet, &mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        assert!(matches!(
            codec.decode(&mut buf),
            Err(BusError::ChecksumMismatch)
        ));
    }

    #[test]
    fn control_packet_has_no_payload() {
        let pkt = Packet::control(MessageKind::Acquire, PacketFlags::empty(), 3);
        assert!(pkt.payload().is_empty());
        assert!(pkt.verify());
    }

    #[test]
    fn unknown_kind_rejected() {
        let mut codec = BusCodec::new();
        let mut pkt = Packet::control(MessageKind::Bye, PacketFlags::empty(), 1);
        pkt.header.kind = 0xFFFF;

        let mut buf = BytesMut::new();
        codec.encode(pkt, &mut buf).unwrap();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(BusError::UnknownVariant { .. })
        ));
    }
}
