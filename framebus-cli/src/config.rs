//! Configuration for the framebus command-line tool.

use std::path::Path;

use serde::{Deserialize, Serialize};

use framebus_core::{Compression, PixelFormat, ServerOptions};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Bus directory settings.
    pub bus: BusConfig,
    /// Test-pattern publisher settings.
    pub publish: PublishConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Bus directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bus directory override. Empty means the platform default
    /// (also overridable via FRAMEBUS_DIR).
    pub dir: String,
    /// Maximum concurrent consumers per published endpoint.
    pub max_clients: usize,
}

/// Test-pattern publisher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Pattern width in pixels.
    pub width: u32,
    /// Pattern height in pixels.
    pub height: u32,
    /// Target frames per second.
    pub fps: u8,
    /// Pixel format: "bgra8", "rgba8", "rgb8".
    pub format: String,
    /// Frame compression: "none" or "zstd".
    pub compression: String,
    /// zstd compression level (1-19).
    pub zstd_level: i32,
    /// Mark published frames as vertically flipped.
    pub flip: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            publish: PublishConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            max_clients: 16,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            fps: 30,
            format: "bgra8".into(),
            compression: "zstd".into(),
            zstd_level: 1,
            flip: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CliConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Runs before tracing is initialized, so parse problems go to
    /// stderr directly.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Pixel format the publisher should generate.
    pub fn pixel_format(&self) -> PixelFormat {
        match self.publish.format.as_str() {
            "rgba8" => PixelFormat::Rgba8,
            "rgb8" => PixelFormat::Rgb8,
            _ => PixelFormat::Bgra8,
        }
    }

    /// Convert publisher settings into `ServerOptions`.
    pub fn server_options(&self) -> ServerOptions {
        let compression = match self.publish.compression.as_str() {
            "none" => Compression::None,
            _ => Compression::Zstd {
                level: self.publish.zstd_level.clamp(1, 19),
            },
        };
        ServerOptions::default()
            .with_compression(compression)
            .with_max_clients(self.bus.max_clients)
    }
}

// ── Tests ────────────────────────────────────────────────────────
