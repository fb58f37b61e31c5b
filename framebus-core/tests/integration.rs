//! End-to-end tests: a real `FrameServer` on a loopback socket, a real
//! `FrameClient` resolving it through a throwaway bus directory.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio_util::codec::Framed;

use framebus_core::message::Hello;
use framebus_core::{
    BusCodec, BusError, Compression, CpuDevice, CpuTexture, FrameClient, FrameServer, MessageKind,
    PROTOCOL_VERSION, PixelFormat, Region, ServerOptions, list_endpoints,
};

/// A texture whose packed bytes are a deterministic gradient, so crops
/// and flips can be checked byte-for-byte.
fn gradient_texture(width: u32, height: u32) -> CpuTexture {
    let len = (width * height * 4) as usize;
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    CpuTexture::from_packed(width, height, PixelFormat::Bgra8, data).unwrap()
}

/// The packed bytes `region` of `gradient_texture(width, _)` covers.
fn expected_crop(width: u32, region: Region) -> Vec<u8> {
    let row_bytes = (width * 4) as usize;
    let mut out = Vec::new();
    for row in region.y..region.y + region.height {
        let start = row as usize * row_bytes + (region.x * 4) as usize;
        let end = start + (region.width * 4) as usize;
        out.extend((start..end).map(|i| (i % 251) as u8));
    }
    out
}

async fn bind(dir: &std::path::Path, name: &str) -> FrameServer {
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
async fn endpoint_is_listed_while_active() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind(dir.path(), "video").await;

    let records = list_endpoints(dir.path()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "video");
    assert_eq!(records[0].port, server.port());

    server.stop();
    assert!(list_endpoints(dir.path()).unwrap().is_empty());
}

#[tokio::test]
async fn acquire_before_any_publish_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let _server = bind(dir.path(), "video").await;

    let mut client = FrameClient::connect_in(dir.path(), "video").await.unwrap();
    assert_eq!(client.info().name, "video");
    assert!(format!("{client:?}").contains("\"video\""));
    assert!(client.acquire_latest().await.unwrap().is_none());
}

#[tokio::test]
async fn published_pixels_roundtrip_to_client() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind(dir.path(), "video").await;
    let texture = gradient_texture(16, 12);
    let region = Region::new(3, 2, 7, 5);

    server.publish_frame(&texture, region, false).unwrap();

    let mut client = FrameClient::connect_in(dir.path(), "video").await.unwrap();
    let frame = client.acquire_latest().await.unwrap().expect("frame");
    assert_eq!(frame.sequence, 1);
    assert_eq!((frame.width, frame.height), (7, 5));
    assert_eq!(frame.format, PixelFormat::Bgra8);
    assert!(!frame.flipped);
    assert_eq!(frame.data, expected_crop(16, region));
}

#[tokio::test]
async fn flip_flag_travels_with_the_frame() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind(dir.path(), "video").await;
    let texture = gradient_texture(4, 3);

    server
        .publish_frame(&texture, Region::full(4, 3), true)
        .unwrap();

    let mut client = FrameClient::connect_in(dir.path(), "video").await.unwrap();
    let frame = client.acquire_latest().await.unwrap().expect("frame");
    assert!(frame.flipped);

    // Reversing the rows yields the upright image.
    let upright = frame.flipped_copy();
    assert!(!upright.flipped);
    let bottom_row = &expected_crop(4, Region::full(4, 3))[2 * 16..];
    assert_eq!(&upright.data[..16], bottom_row);
}

#[tokio::test]
async fn repeated_acquire_sees_only_the_newest_frame() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind(dir.path(), "video").await;
    let texture = gradient_texture(8, 8);

    server
        .publish_frame(&texture, Region::full(8, 8), false)
        .unwrap();
    server
        .publish_frame(&texture, Region::new(0, 0, 4, 4), false)
        .unwrap();

    let mut client = FrameClient::connect_in(dir.path(), "video").await.unwrap();
    let frame = client.acquire_latest().await.unwrap().expect("frame");
    assert_eq!(frame.sequence, 2);
    assert_eq!(frame.width, 4);

    // No new publish: the same frame again, never an older one.
    let again = client.acquire_latest().await.unwrap().expect("frame");
    assert_eq!(again.sequence, 2);
}

#[tokio::test]
async fn subscriber_receives_pushed_frames_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind(dir.path(), "video").await;
    let texture = gradient_texture(8, 8);

    server
        .publish_frame(&texture, Region::full(8, 8), false)
        .unwrap();

    let client = FrameClient::connect_in(dir.path(), "video").await.unwrap();
    let mut stream = client.subscribe().await.unwrap();

    // The frame published before subscribing is delivered first.
    let first = stream.next_frame().await.unwrap().expect("frame");
    assert_eq!(first.sequence, 1);

    server
        .publish_frame(&texture, Region::full(8, 8), false)
        .unwrap();
    let second = stream.next_frame().await.unwrap().expect("frame");
    assert_eq!(second.sequence, 2);

    let stats = stream.stats();
    assert_eq!(stats.total_frames, 2);
    assert_eq!(stats.width, 8);
}

#[tokio::test]
async fn slow_subscriber_never_blocks_the_publisher() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind(dir.path(), "video").await;
    let texture = gradient_texture(8, 8);

    server
        .publish_frame(&texture, Region::full(8, 8), false)
        .unwrap();

    let client = FrameClient::connect_in(dir.path(), "video").await.unwrap();
    let mut stream = client.subscribe().await.unwrap();
    assert_eq!(stream.next_frame().await.unwrap().unwrap().sequence, 1);

    // Burst out frames while the subscriber reads nothing. Every
    // publish completes immediately; the slot just overwrites.
    for _ in 0..20 {
        server
            .publish_frame(&texture, Region::full(8, 8), false)
            .unwrap();
    }
    assert_eq!(server.frames_published(), 21);

    // Catching up, the subscriber sees monotonically increasing
    // sequences (skipped frames are fine) and ends on the newest.
    let mut last = 1;
    loop {
        let frame = stream.next_frame().await.unwrap().expect("frame");
        assert!(frame.sequence > last, "sequence went backwards");
        last = frame.sequence;
        if last == 21 {
            break;
        }
    }
}

#[tokio::test]
async fn late_subscriber_starts_at_the_newest_frame() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind(dir.path(), "video").await;
    let texture = gradient_texture(8, 8);

    for _ in 0..5 {
        server
            .publish_frame(&texture, Region::full(8, 8), false)
            .unwrap();
    }

    // Frames 1-4 are gone; a subscriber arriving now gets only 5.
    let client = FrameClient::connect_in(dir.path(), "video").await.unwrap();
    let mut stream = client.subscribe().await.unwrap();
    assert_eq!(stream.next_frame().await.unwrap().unwrap().sequence, 5);
}

#[tokio::test]
async fn mismatched_protocol_version_is_turned_away() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind(dir.path(), "video").await;

    // Speak the framing but offer a future protocol version.
    let stream = tokio::net::TcpStream::connect(("127.0.0.1", server.port()))
        .await
        .unwrap();
    let mut framed = Framed::new(stream, BusCodec::new());
    let mut hello = Hello::new("time-traveler");
    hello.protocol_version = PROTOCOL_VERSION + 1;
    framed.send(hello.into_packet(1).unwrap()).await.unwrap();

    let reply = framed.next().await.unwrap().unwrap();
    assert_eq!(reply.kind().unwrap(), MessageKind::Bye);
}

#[tokio::test]
async fn max_clients_limit_refuses_extra_consumers() {
    let dir = tempfile::tempdir().unwrap();
    let server = FrameServer::bind_in(
        dir.path(),
        "video",
        Arc::new(CpuDevice::default()),
        ServerOptions::default().with_max_clients(1),
    )
    .await
    .unwrap();
    assert!(server.is_active());

    let _first = FrameClient::connect_in(dir.path(), "video").await.unwrap();

    // The listener drops the second connection before the handshake.
    let err = FrameClient::connect_in(dir.path(), "video")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BusError::ProtocolViolation(_) | BusError::Connection(_)
    ));
}

#[tokio::test]
async fn stop_ends_subscriptions_and_unregisters() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind(dir.path(), "video").await;
    let texture = gradient_texture(4, 4);
    server
        .publish_frame(&texture, Region::full(4, 4), false)
        .unwrap();

    let client = FrameClient::connect_in(dir.path(), "video").await.unwrap();
    let mut stream = client.subscribe().await.unwrap();
    assert!(stream.next_frame().await.unwrap().is_some());

    server.stop();

    // Clean end of stream, not an error.
    assert!(stream.next_frame().await.unwrap().is_none());

    // The name is gone from the bus.
    let err = FrameClient::connect_in(dir.path(), "video")
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::EndpointNotFound(_)));
}

#[tokio::test]
async fn publish_after_stop_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind(dir.path(), "video").await;
    let texture = gradient_texture(4, 4);

    server.stop();
    assert!(matches!(
        server.publish_frame(&texture, Region::full(4, 4), false),
        Err(BusError::Stopped)
    ));
}

#[tokio::test]
async fn second_bind_of_same_name_fails() {
    let dir = tempfile::tempdir().unwrap();
    let _server = bind(dir.path(), "video").await;

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
async fn name_is_freed_after_stop() {
    let dir = tempfile::tempdir().unwrap();
    let server = bind(dir.path(), "video").await;
    server.stop();

    let rebound = bind(dir.path(), "video").await;
    assert!(rebound.is_active());
}

#[tokio::test]
async fn uncompressed_endpoint_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    let server = FrameServer::bind_in(
        dir.path(),
        "raw",
        Arc::new(CpuDevice::default()),
        ServerOptions::default().with_compression(Compression::None),
    )
    .await
    .unwrap();
    let texture = gradient_texture(6, 6);
    let region = Region::full(6, 6);
    server.publish_frame(&texture, region, false).unwrap();

    let mut client = FrameClient::connect_in(dir.path(), "raw").await.unwrap();
    let frame = client.acquire_latest().await.unwrap().expect("frame");
    assert_eq!(frame.data, expected_crop(6, region));
}

#[tokio::test]
async fn two_endpoints_coexist_under_different_names() {
    let dir = tempfile::tempdir().unwrap();
    let a = bind(dir.path(), "camera.front").await;
    let b = bind(dir.path(), "camera.rear").await;
    a.publish_frame(&gradient_texture(4, 4), Region::full(4, 4), false)
        .unwrap();
    b.publish_frame(&gradient_texture(2, 2), Region::full(2, 2), false)
        .unwrap();

    let mut front = FrameClient::connect_in(dir.path(), "camera.front")
        .await
        .unwrap();
    let mut rear = FrameClient::connect_in(dir.path(), "camera.rear")
        .await
        .unwrap();
    assert_eq!(front.acquire_latest().await.unwrap().unwrap().width, 4);
    assert_eq!(rear.acquire_latest().await.unwrap().unwrap().width, 2);

    let names: Vec<_> = list_endpoints(dir.path())
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, ["camera.front", "camera.rear"]);
}
