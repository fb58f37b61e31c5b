//! Publishing endpoint.
//!
//! [`FrameServer`] owns a named endpoint on the local bus:
//!
//! 1. `bind` claims the name: a loopback listener plus a registry
//!    record other processes can resolve.
//! 2. `publish_frame` reads the designated texture region back through
//!    the device, encodes it and stores it in the latest-frame slot.
//!    Connected subscribers are woken; nothing blocks the publisher.
//! 3. `stop` (or drop) retires the name and notifies consumers.
//!
//! The latest-frame slot is a `tokio::sync::watch` channel: retrieval
//! is always "the most recently published frame", and a slow consumer
//! skips to the newest frame instead of queueing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::codec::{BusCodec, Packet, PacketFlags};
use crate::encode::{Compression, FrameDecoder, FrameEncoder};
use crate::error::BusError;
use crate::frame::{Region, SharedFrame};
use crate::message::{
    EndpointInfo, FrameReply, Hello, HelloAck, MessageKind, PROTOCOL_VERSION, WireFrame,
};
use crate::registry::{self, EndpointRecord};
use crate::state::EndpointPhase;
use crate::texture::{GpuDevice, Texture};

/// How long to wait when probing whether an existing record still has
/// a live listener behind it.
const PROBE_TIMEOUT: Duration = Duration::from_millis(300);

// ── ServerOptions ────────────────────────────────────────────────

/// Configuration accepted at endpoint construction.
///
/// Recognised keys:
/// - `compression` — pixel payload compression ([`Compression`]).
/// - `max_clients` — concurrent consumer connections; excess connects
///   are refused.
/// - `handshake_timeout` — how long a fresh connection may take to
///   send its `Hello`.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub compression: Compression,
    pub max_clients: usize,
    pub handshake_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            max_clients: 16,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerOptions {
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients.max(1);
        self
    }
}

// ── Latest-frame slot ────────────────────────────────────────────

/// Contents of the single-slot frame store.
#[derive(Debug, Clone)]
enum Slot {
    /// Nothing published yet.
    Empty,
    /// The most recently published frame.
    Live(Arc<WireFrame>),
    /// The endpoint stopped; terminal.
    Stopped,
}

// ── FrameServer ──────────────────────────────────────────────────

/// A named publishing endpoint bound to a device.
///
/// # Lifetime
///
/// Active from [`bind`](Self::bind) until [`stop`](Self::stop) (or
/// drop). `stop` is idempotent; after it, `publish_frame` returns
/// [`BusError::Stopped`] and `latest_frame` returns `None`.
pub struct FrameServer {
    name: String,
    dir: PathBuf,
    device: Arc<dyn GpuDevice>,
    encoder: FrameEncoder,
    info: EndpointInfo,
    port: u16,
    phase: Mutex<EndpointPhase>,
    started: Instant,
    sequence: AtomicU64,
    slot_tx: watch::Sender<Slot>,
    shutdown_tx: watch::Sender<bool>,
}

impl FrameServer {
    /// Bind an endpoint in the default bus directory.
    pub async fn bind(
        name: impl Into<String>,
        device: Arc<dyn GpuDevice>,
        options: ServerOptions,
    ) -> Result<Self, BusError> {
        Self::bind_in(registry::default_dir(), name, device, options).await
    }

    /// Bind an endpoint in an explicit bus directory.
    ///
    /// Fails with [`BusError::EndpointTaken`] when a live server
    /// already publishes under `name`; a stale record (no listener
    /// answering) is removed and the name reclaimed.
    pub async fn bind_in(
        dir: impl Into<PathBuf>,
        name: impl Into<String>,
        device: Arc<dyn GpuDevice>,
        options: ServerOptions,
    ) -> Result<Self, BusError> {
        let dir = dir.into();
        let name = name.into();

        registry::validate_name(&name)?;
        if !device.is_usable() {
            return Err(BusError::InvalidDevice(device.label().to_string()));
        }

        // Name collision check: a record only blocks us while a
        // listener still answers behind it.
        if let Some(existing) = registry::resolve(&dir, &name)? {
            match timeout(PROBE_TIMEOUT, TcpStream::connect(existing.addr())).await {
                Ok(Ok(_)) => return Err(BusError::EndpointTaken(name)),
                _ => {
                    info!(name = %name, "reclaiming stale endpoint record");
                    registry::remove(&dir, &name);
                }
            }
        }

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let record = EndpointRecord::new(&name, port, PROTOCOL_VERSION);
        record.write(&dir)?;
        let endpoint_info = record.info();

        let (slot_tx, slot_rx) = watch::channel(Slot::Empty);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(accept_loop(
            listener,
            endpoint_info.clone(),
            options.clone(),
            slot_rx,
            shutdown_rx,
        ));

        info!(name = %name, port, device = device.label(), "endpoint active");

        Ok(Self {
            name,
            dir,
            device,
            encoder: FrameEncoder::new(options.compression),
            info: endpoint_info,
            port,
            phase: Mutex::new(EndpointPhase::new()),
            started: Instant::now(),
            sequence: AtomicU64::new(0),
            slot_tx,
            shutdown_tx,
        })
    }

    /// Publish one frame: the `region` of `texture`, with its
    /// vertical-flip flag.
    ///
    /// Synchronous readback: when this returns, the caller may reuse
    /// or destroy the texture. Fan-out to consumers happens on
    /// background tasks and never blocks this call.
    pub fn publish_frame(
        &self,
        texture: &dyn Texture,
        region: Region,
        flip: bool,
    ) -> Result<(), BusError> {
        if !self.is_active() {
            return Err(BusError::Stopped);
        }
        if region.is_empty() || !region.fits_within(texture.width(), texture.height()) {
            return Err(BusError::InvalidRegion {
                region,
                width: texture.width(),
                height: texture.height(),
            });
        }

        let raw = self.device.read_region(texture, region)?;
        let timestamp_us = self.started.elapsed().as_micros() as u64;

        // The lock serializes against stop(): a concurrent stop cannot
        // be overwritten by a late frame, and the counter only advances
        // once the frame has actually landed in the slot.
        let phase = self.phase.lock().expect("phase lock poisoned");
        if !phase.is_active() {
            return Err(BusError::Stopped);
        }
        let sequence = self.sequence.load(Ordering::SeqCst) + 1;
        let wire = self.encoder.encode(&raw, flip, sequence, timestamp_us)?;
        tracing::trace!(sequence, width = wire.width, height = wire.height, "frame published");
        self.slot_tx.send_replace(Slot::Live(Arc::new(wire)));
        self.sequence.store(sequence, Ordering::SeqCst);
        Ok(())
    }

    /// The most recently published frame, or `None` before the first
    /// publish and after `stop`.
    pub fn latest_frame(&self) -> Option<SharedFrame> {
        let wire = match &*self.slot_tx.borrow() {
            Slot::Live(frame) => Arc::clone(frame),
            Slot::Empty | Slot::Stopped => return None,
        };
        match FrameDecoder::new().decode(&wire) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("latest frame undecodable: {e}");
                None
            }
        }
    }

    /// Retire the endpoint. Idempotent: the first call unregisters the
    /// name and notifies consumers; later calls are no-ops.
    pub fn stop(&self) {
        {
            let mut phase = self.phase.lock().expect("phase lock poisoned");
            if !phase.stop() {
                return;
            }
            self.slot_tx.send_replace(Slot::Stopped);
        }
        self.shutdown_tx.send_replace(true);
        registry::remove(&self.dir, &self.name);
        info!(name = %self.name, frames = self.frames_published(), "endpoint stopped");
    }

    // ── Introspection ────────────────────────────────────────────

    /// Public endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity reported to consumers at handshake.
    pub fn info(&self) -> EndpointInfo {
        self.info.clone()
    }

    /// Loopback port the endpoint listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the endpoint can still publish and serve frames.
    pub fn is_active(&self) -> bool {
        self.phase.lock().expect("phase lock poisoned").is_active()
    }

    /// Total frames published since bind.
    pub fn frames_published(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FrameServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameServer")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("active", &self.is_active())
            .field("frames_published", &self.frames_published())
            .finish_non_exhaustive()
    }
}

impl Drop for FrameServer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Accept loop ──────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    info: EndpointInfo,
    options: ServerOptions,
    slot_rx: watch::Receiver<Slot>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let clients = Arc::new(AtomicUsize::new(0));
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if clients.load(Ordering::SeqCst) >= options.max_clients {
                            warn!(%peer, "refusing consumer: max_clients reached");
                            continue;
                        }
                        clients.fetch_add(1, Ordering::SeqCst);
                        let info = info.clone();
                        let options = options.clone();
                        let slot_rx = slot_rx.clone();
                        let shutdown_rx = shutdown_rx.clone();
                        let clients = Arc::clone(&clients);
                        tokio::spawn(async move {
                            if let Err(e) =
                                serve_connection(stream, info, options, slot_rx, shutdown_rx).await
                            {
                                debug!(%peer, "consumer connection ended: {e}");
                            }
                            clients.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
            _ = shutdown_rx.changed() => {
                debug!(name = %info.name, "accept loop shutting down");
                break;
            }
        }
    }
}

/// Per-consumer protocol handler.
async fn serve_connection(
    stream: TcpStream,
    info: EndpointInfo,
    options: ServerOptions,
    mut slot_rx: watch::Receiver<Slot>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), BusError> {
    let mut framed = Framed::new(stream, BusCodec::new());
    let mut seq: u64 = 0;

    // Handshake: the consumer speaks first.
    let first = timeout(options.handshake_timeout, framed.next())
        .await
        .map_err(|_| BusError::Timeout(options.handshake_timeout))?
        .ok_or(BusError::ProtocolViolation("closed before hello"))??;
    if first.kind()? != MessageKind::Hello {
        return Err(BusError::ProtocolViolation("expected hello"));
    }
    let hello = Hello::from_bytes(first.payload())?;
    if hello.protocol_version != PROTOCOL_VERSION {
        seq += 1;
        let _ = framed
            .send(Packet::control(MessageKind::Bye, PacketFlags::empty(), seq))
            .await;
        return Err(BusError::UnsupportedVersion(hello.protocol_version));
    }
    debug!(client = %hello.client, endpoint = %info.name, "consumer connected");

    seq += 1;
    framed.send(HelloAck { info }.into_packet(seq)?).await?;

    let mut subscribed = false;
    loop {
        tokio::select! {
            incoming = framed.next() => {
                let packet = match incoming {
                    None => break,
                    Some(Err(e)) => return Err(e),
                    Some(Ok(packet)) => packet,
                };
                match packet.kind()? {
                    MessageKind::Acquire => {
                        let frame = match &*slot_rx.borrow() {
                            Slot::Live(frame) => Some((**frame).clone()),
                            Slot::Empty | Slot::Stopped => None,
                        };
                        seq += 1;
                        framed.send(FrameReply { frame }.into_packet(seq)?).await?;
                    }
                    MessageKind::Subscribe => {
                        subscribed = true;
                        // Deliver the current frame (if any) right away.
                        slot_rx.mark_changed();
                        seq += 1;
                        framed
                            .send(Packet::control(
                                MessageKind::SubscribeAck,
                                PacketFlags::empty(),
                                seq,
                            ))
                            .await?;
                    }
                    MessageKind::Bye => break,
                    _ => return Err(BusError::ProtocolViolation("unexpected message")),
                }
            }
            changed = slot_rx.changed(), if subscribed => {
                if changed.is_err() {
                    break;
                }
                let slot = slot_rx.borrow_and_update().clone();
                match slot {
                    Slot::Live(frame) => {
                        seq += 1;
                        framed.send((*frame).clone().into_packet(seq)?).await?;
                    }
                    Slot::Stopped => {
                        seq += 1;
                        let _ = framed
                            .send(Packet::control(MessageKind::Bye, PacketFlags::STOPPED, seq))
                            .await;
                        break;
                    }
                    Slot::Empty => {}
                }
            }
            _ = shutdown_rx.changed(), if !subscribed => {
                seq += 1;
                let _ = framed
                    .send(Packet::control(MessageKind::Bye, PacketFlags::STOPPED, seq))
                    .await;
                break;
            }
        }
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use crate::texture::{CpuDevice, CpuTexture};

    fn test_texture(width: u32, height: u32) -> CpuTexture {
        let data = vec![0x42u8; (width * height * 4) as usize];
        CpuTexture::from_packed(width, height, PixelFormat::Bgra8, data).unwrap()
    }

    async fn test_server(dir: &std::path::Path, name: &str) -> FrameServer {
        FrameServer::bind_in(
            dir,
            name,
            Arc::new(CpuDevice::default()),
            ServerOptions::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn bind_registers_and_is_active() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path(), "video").await;

        assert!(server.is_active());
        assert_eq!(server.frames_published(), 0);
        let record = registry::resolve(dir.path(), "video").unwrap().unwrap();
        assert_eq!(record.port, server.port());
    }

    #[tokio::test]
    async fn latest_is_none_before_publish() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path(), "empty").await;
        assert!(server.latest_frame().is_none());
    }

    #[tokio::test]
    async fn publish_then_latest_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path(), "video").await;
        let texture = test_texture(8, 8);

        server
            .publish_frame(&texture, Region::new(2, 2, 4, 3), true)
            .unwrap();

        let frame = server.latest_frame().expect("frame present");
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.width, 4);
        assert_eq!(frame.height, 3);
        assert!(frame.flipped);
        assert_eq!(frame.data.len(), 4 * 3 * 4);
        assert_eq!(server.frames_published(), 1);
    }

    #[tokio::test]
    async fn latest_frame_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path(), "video").await;
        let texture = test_texture(8, 8);

        server
            .publish_frame(&texture, Region::full(8, 8), false)
            .unwrap();
        server
            .publish_frame(&texture, Region::full(4, 4), false)
            .unwrap();

        let frame = server.latest_frame().unwrap();
        assert_eq!(frame.sequence, 2);
        assert_eq!(frame.width, 4);
    }

    #[tokio::test]
    async fn invalid_regions_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path(), "video").await;
        let texture = test_texture(8, 8);

        let err = server
            .publish_frame(&texture, Region::new(4, 4, 8, 8), false)
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidRegion { .. }));

        let err = server
            .publish_frame(&texture, Region::new(0, 0, 0, 8), false)
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidRegion { .. }));
    }

    #[tokio::test]
    async fn stop_is_terminal_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path(), "video").await;
        let texture = test_texture(4, 4);
        server
            .publish_frame(&texture, Region::full(4, 4), false)
            .unwrap();

        server.stop();
        server.stop(); // no-op

        assert!(!server.is_active());
        assert!(server.latest_frame().is_none());
        assert!(matches!(
            server.publish_frame(&texture, Region::full(4, 4), false),
            Err(BusError::Stopped)
        ));
        assert!(registry::resolve(dir.path(), "video").unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_name_rejected_while_live() {
        let dir = tempfile::tempdir().unwrap();
        let _server = test_server(dir.path(), "video").await;

        let err = FrameServer::bind_in(
            dir.path(),
            "video",
            Arc::new(CpuDevice::default()),
            ServerOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BusError::EndpointTaken(_)));
    }

    #[tokio::test]
    async fn stale_record_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        // A record pointing at a port nobody listens on.
        EndpointRecord::new("video", 1, PROTOCOL_VERSION)
            .write(dir.path())
            .unwrap();

        let server = test_server(dir.path(), "video").await;
        assert!(server.is_active());
        let record = registry::resolve(dir.path(), "video").unwrap().unwrap();
        assert_eq!(record.port, server.port());
    }

    #[tokio::test]
    async fn unusable_device_rejected() {
        struct DeadDevice;
        impl GpuDevice for DeadDevice {
            fn label(&self) -> &str {
                "dead"
            }
            fn is_usable(&self) -> bool {
                false
            }
            fn read_region(
                &self,
                _texture: &dyn Texture,
                _region: Region,
            ) -> Result<crate::frame::RawFrame, BusError> {
                Err(BusError::InvalidDevice("dead".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let err = FrameServer::bind_in(
            dir.path(),
            "video",
            Arc::new(DeadDevice),
            ServerOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BusError::InvalidDevice(_)));
        // Construction failure leaves no record behind.
        assert!(registry::resolve(dir.path(), "video").unwrap().is_none());
    }

    #[tokio::test]
    async fn frames_published_counts_only_successes() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path(), "video").await;
        let texture = test_texture(4, 4);

        server
            .publish_frame(&texture, Region::full(4, 4), false)
            .unwrap();
        assert_eq!(server.frames_published(), 1);

        // Rejected publishes leave the counter alone.
        server
            .publish_frame(&texture, Region::new(0, 0, 8, 8), false)
            .unwrap_err();
        assert_eq!(server.frames_published(), 1);

        server.stop();
        server
            .publish_frame(&texture, Region::full(4, 4), false)
            .unwrap_err();
        assert_eq!(server.frames_published(), 1);

        // The counter always matches the slot's sequence number.
        let last = server.latest_frame();
        assert!(last.is_none()); // stopped
    }

    #[tokio::test]
    async fn debug_output_reports_state() {
        let dir = tempfile::tempdir().unwrap();
        let server = test_server(dir.path(), "video").await;
        let repr = format!("{server:?}");
        assert!(repr.contains("\"video\""));
        assert!(repr.contains("active: true"));
    }

    #[tokio::test]
    async fn invalid_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = FrameServer::bind_in(
            dir.path(),
            "",
            Arc::new(CpuDevice::default()),
            ServerOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BusError::InvalidName(_)));
    }
}
