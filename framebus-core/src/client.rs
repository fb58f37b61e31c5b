//! Consumer side of the bus.
//!
//! [`FrameClient`] resolves an endpoint name through the registry,
//! connects to its loopback listener and performs the hello exchange.
//! From there the caller either polls with
//! [`acquire_latest`](FrameClient::acquire_latest) or upgrades to a
//! pushed [`FrameStream`] with [`subscribe`](FrameClient::subscribe).

use std::path::Path;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::codec::{BusCodec, Packet, PacketFlags};
use crate::encode::FrameDecoder;
use crate::error::BusError;
use crate::frame::SharedFrame;
use crate::message::{
    EndpointInfo, FrameReply, Hello, HelloAck, MessageKind, PROTOCOL_VERSION, WireFrame,
};
use crate::registry;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Smoothing factor for the frame-rate estimate.
const FPS_ALPHA: f64 = 0.1;

// ── ClientStats ──────────────────────────────────────────────────

/// Running counters over frames received on this connection.
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    pub total_frames: u64,
    pub total_bytes: u64,
    /// Smoothed frames-per-second estimate from inter-arrival times.
    pub fps: f64,
    /// Dimensions of the most recent frame.
    pub width: u32,
    pub height: u32,
}

// ── FrameClient ──────────────────────────────────────────────────

/// A connection to one named endpoint.
pub struct FrameClient {
    framed: Framed<TcpStream, BusCodec>,
    info: EndpointInfo,
    decoder: FrameDecoder,
    stats: ClientStats,
    last_frame_at: Option<Instant>,
    sequence: u64,
}

impl FrameClient {
    /// Connect to `name` in the default bus directory.
    pub async fn connect(name: &str) -> Result<Self, BusError> {
        Self::connect_in(registry::default_dir(), name).await
    }

    /// Connect to `name` in an explicit bus directory.
    ///
    /// A record whose listener no longer answers is treated as a dead
    /// endpoint: the record is removed and the connect fails with
    /// [`BusError::EndpointNotFound`].
    pub async fn connect_in(dir: impl AsRef<Path>, name: &str) -> Result<Self, BusError> {
        let dir = dir.as_ref();
        registry::validate_name(name)?;
        let record = registry::resolve(dir, name)?
            .ok_or_else(|| BusError::EndpointNotFound(name.to_string()))?;

        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(record.addr())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!(name, "stale endpoint record, listener gone: {e}");
                registry::remove(dir, name);
                return Err(BusError::EndpointNotFound(name.to_string()));
            }
            Err(_) => {
                registry::remove(dir, name);
                return Err(BusError::EndpointNotFound(name.to_string()));
            }
        };

        let mut framed = Framed::new(stream, BusCodec::new());
        let mut sequence: u64 = 1;
        framed
            .send(Hello::new(client_label()).into_packet(sequence)?)
            .await?;

        let reply = timeout(HANDSHAKE_TIMEOUT, framed.next())
            .await
            .map_err(|_| BusError::Timeout(HANDSHAKE_TIMEOUT))?
            .ok_or(BusError::ProtocolViolation("closed during handshake"))??;
        let info = match reply.kind()? {
            MessageKind::HelloAck => HelloAck::from_bytes(reply.payload())?.info,
            // The server turns away clients it cannot speak to.
            MessageKind::Bye => return Err(BusError::UnsupportedVersion(PROTOCOL_VERSION)),
            _ => return Err(BusError::ProtocolViolation("expected hello ack")),
        };
        if info.protocol_version != PROTOCOL_VERSION {
            return Err(BusError::UnsupportedVersion(info.protocol_version));
        }
        debug!(name, pid = info.pid, "connected to endpoint");
        sequence += 1;

        Ok(Self {
            framed,
            info,
            decoder: FrameDecoder::new(),
            stats: ClientStats::default(),
            last_frame_at: None,
            sequence,
        })
    }

    /// Request the most recently published frame.
    ///
    /// `Ok(None)` means the endpoint has nothing yet (no publish so
    /// far) or has stopped.
    pub async fn acquire_latest(&mut self) -> Result<Option<SharedFrame>, BusError> {
        self.sequence += 1;
        self.framed
            .send(Packet::control(
                MessageKind::Acquire,
                PacketFlags::empty(),
                self.sequence,
            ))
            .await?;

        loop {
            let Some(result) = self.framed.next().await else {
                // Endpoint went away mid-request.
                return Ok(None);
            };
            let packet = result?;
            match packet.kind()? {
                MessageKind::FrameReply => {
                    let reply = FrameReply::from_bytes(packet.payload())?;
                    return match reply.frame {
                        Some(wire) => {
                            let frame = self.decoder.decode(&wire)?;
                            self.note_frame(&frame);
                            Ok(Some(frame))
                        }
                        None => Ok(None),
                    };
                }
                MessageKind::Bye => return Ok(None),
                _ => return Err(BusError::ProtocolViolation("unexpected reply")),
            }
        }
    }

    /// Switch to push delivery: every publish from here on arrives as
    /// a frame on the returned stream.
    pub async fn subscribe(mut self) -> Result<FrameStream, BusError> {
        self.sequence += 1;
        self.framed
            .send(Packet::control(
                MessageKind::Subscribe,
                PacketFlags::empty(),
                self.sequence,
            ))
            .await?;

        loop {
            let Some(result) = self.framed.next().await else {
                return Err(BusError::ProtocolViolation("closed during subscribe"));
            };
            let packet = result?;
            match packet.kind()? {
                MessageKind::SubscribeAck => break,
                MessageKind::Bye => return Err(BusError::Stopped),
                _ => return Err(BusError::ProtocolViolation("expected subscribe ack")),
            }
        }
        Ok(FrameStream { inner: self })
    }

    /// Identity the endpoint reported at handshake.
    pub fn info(&self) -> &EndpointInfo {
        &self.info
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    fn note_frame(&mut self, frame: &SharedFrame) {
        let now = Instant::now();
        if let Some(prev) = self.last_frame_at {
            let dt = now.duration_since(prev).as_secs_f64();
            if dt > 0.0 {
                let instant_fps = 1.0 / dt;
                self.stats.fps = if self.stats.fps == 0.0 {
                    instant_fps
                } else {
                    (1.0 - FPS_ALPHA) * self.stats.fps + FPS_ALPHA * instant_fps
                };
            }
        }
        self.last_frame_at = Some(now);
        self.stats.total_frames += 1;
        self.stats.total_bytes += frame.data.len() as u64;
        self.stats.width = frame.width;
        self.stats.height = frame.height;
    }
}

impl std::fmt::Debug for FrameClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameClient")
            .field("endpoint", &self.info.name)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

// ── FrameStream ──────────────────────────────────────────────────

/// Push-mode view of a connection, produced by
/// [`FrameClient::subscribe`].
#[derive(Debug)]
pub struct FrameStream {
    inner: FrameClient,
}

impl FrameStream {
    /// Wait for the next pushed frame.
    ///
    /// `Ok(None)` is the clean end of the stream: the endpoint stopped
    /// or the connection closed.
    pub async fn next_frame(&mut self) -> Result<Option<SharedFrame>, BusError> {
        loop {
            let Some(result) = self.inner.framed.next().await else {
                return Ok(None);
            };
            let packet = result?;
            match packet.kind()? {
                MessageKind::Frame => {
                    let wire = WireFrame::from_bytes(packet.payload())?;
                    let frame = self.inner.decoder.decode(&wire)?;
                    self.inner.note_frame(&frame);
                    return Ok(Some(frame));
                }
                MessageKind::Bye => return Ok(None),
                // A late reply to an earlier acquire is harmless.
                MessageKind::FrameReply => continue,
                _ => return Err(BusError::ProtocolViolation("unexpected message")),
            }
        }
    }

    pub fn info(&self) -> &EndpointInfo {
        self.inner.info()
    }

    pub fn stats(&self) -> &ClientStats {
        self.inner.stats()
    }
}

fn client_label() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| format!("pid-{}", std::process::id()))
}
