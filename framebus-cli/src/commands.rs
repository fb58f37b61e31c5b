//! Subcommand implementations: list, publish, watch, acquire.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::time::{MissedTickBehavior, interval};
use tracing::info;

use framebus_core::{
    CpuDevice, CpuTexture, FrameClient, FrameServer, PixelFormat, Region, list_endpoints,
};

use crate::config::CliConfig;

// ── list ─────────────────────────────────────────────────────────

/// Print the endpoints currently registered in the bus directory.
pub fn list(dir: &Path) -> Result<(), Box<dyn Error>> {
    let records = list_endpoints(dir)?;
    if records.is_empty() {
        println!("no endpoints in {}", dir.display());
        return Ok(());
    }

    println!("{:<32} {:>6} {:>8} {:>10}", "NAME", "PORT", "PID", "UPTIME");
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    for record in records {
        println!(
            "{:<32} {:>6} {:>8} {:>10}",
            record.name,
            record.port,
            record.pid,
            fmt_uptime(now_ms.saturating_sub(record.started_unix_ms)),
        );
    }
    Ok(())
}

fn fmt_uptime(ms: u64) -> String {
    let secs = ms / 1000;
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    }
}

// ── publish ──────────────────────────────────────────────────────

/// Publish an animated test pattern under `name` until Ctrl-C, or for
/// `frame_limit` frames when given.
pub async fn publish(
    dir: &Path,
    name: &str,
    config: &CliConfig,
    frame_limit: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    let format = config.pixel_format();
    let width = config.publish.width.max(16);
    let height = config.publish.height.max(16);
    let fps = config.publish.fps.clamp(1, 240);

    let device = Arc::new(CpuDevice::new("test-pattern"));
    let server = FrameServer::bind_in(dir, name, device, config.server_options()).await?;
    info!(name, port = server.port(), width, height, fps, %format, "publishing test pattern");

    let run = Arc::new(AtomicBool::new(true));
    let run_clone = Arc::clone(&run);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received — shutting down");
        run_clone.store(false, Ordering::SeqCst);
    });

    let mut texture =
        CpuTexture::from_packed(width, height, format, render_pattern(width, height, format, 0))?;
    let mut ticker = interval(Duration::from_secs_f64(1.0 / fps as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut tick: u64 = 0;
    while run.load(Ordering::SeqCst) {
        if frame_limit.is_some_and(|limit| tick >= limit) {
            break;
        }
        ticker.tick().await;
        tick += 1;
        texture.update(render_pattern(width, height, format, tick))?;
        server.publish_frame(&texture, Region::full(width, height), config.publish.flip)?;
    }

    let frames = server.frames_published();
    server.stop();
    info!(frames, "publisher stopped");
    Ok(())
}

/// A scrolling colour ramp; `tick` moves the pattern so consumers can
/// see frames advancing.
fn render_pattern(width: u32, height: u32, format: PixelFormat, tick: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(width as usize * height as usize * format.bytes_per_pixel());
    let shift = (tick * 3) as u8;
    for y in 0..height {
        let g = (y as u64 * 255 / height as u64) as u8;
        for x in 0..width {
            let r = ((x as u64 * 255 / width as u64) as u8).wrapping_add(shift);
            let b = ((x ^ y) & 0xFF) as u8;
            match format {
                PixelFormat::Bgra8 => data.extend_from_slice(&[b, g, r, 0xFF]),
                PixelFormat::Rgba8 => data.extend_from_slice(&[r, g, b, 0xFF]),
                PixelFormat::Rgb8 => data.extend_from_slice(&[r, g, b]),
            }
        }
    }
    data
}

// ── watch ────────────────────────────────────────────────────────

/// Subscribe to `name` and report frame statistics until the endpoint
/// stops or Ctrl-C.
pub async fn watch(dir: &Path, name: &str) -> Result<(), Box<dyn Error>> {
    let client = FrameClient::connect_in(dir, name).await?;
    info!(
        endpoint = %client.info().name,
        pid = client.info().pid,
        "connected, subscribing"
    );
    let mut stream = client.subscribe().await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last_report = Instant::now();
    loop {
        tokio::select! {
            frame = stream.next_frame() => {
                match frame? {
                    Some(_) => {
                        if last_report.elapsed() >= Duration::from_secs(1) {
                            let stats = stream.stats();
                            info!(
                                frames = stats.total_frames,
                                fps = format!("{:.1}", stats.fps),
                                size = format!("{}x{}", stats.width, stats.height),
                                mib = format!("{:.1}", stats.total_bytes as f64 / (1024.0 * 1024.0)),
                                "receiving"
                            );
                            last_report = Instant::now();
                        }
                    }
                    None => {
                        info!("endpoint stopped");
                        break;
                    }
                }
            }
            _ = &mut ctrl_c => {
                info!("Ctrl-C received — detaching");
                break;
            }
        }
    }

    let stats = stream.stats();
    info!(
        frames = stats.total_frames,
        bytes = stats.total_bytes,
        "watch finished"
    );
    Ok(())
}

// ── acquire ──────────────────────────────────────────────────────

/// Fetch the latest frame from `name` once; optionally dump the packed
/// pixels to a file.
pub async fn acquire(
    dir: &Path,
    name: &str,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let mut client = FrameClient::connect_in(dir, name).await?;
    match client.acquire_latest().await? {
        Some(frame) => {
            println!(
                "frame #{}: {}x{} {} flipped={} ({} bytes)",
                frame.sequence,
                frame.width,
                frame.height,
                frame.format,
                frame.flipped,
                frame.data.len(),
            );
            if let Some(path) = output {
                std::fs::write(&path, &frame.data)?;
                println!("wrote {}", path.display());
            }
        }
        None => println!("no frame available from '{name}'"),
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
