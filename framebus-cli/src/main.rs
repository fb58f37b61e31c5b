//! framebus — command-line tool for the local frame bus.
//!
//! ```text
//! framebus list                      Show registered endpoints
//! framebus publish <name>            Publish an animated test pattern
//! framebus watch <name>              Subscribe and report frame stats
//! framebus acquire <name> [-o FILE]  Fetch the latest frame once
//! framebus --gen-config              Write default config to stdout
//! ```

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "framebus", about = "Local frame bus: publish and consume GPU frames by name")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "framebus.toml")]
    config: PathBuf,

    /// Bus directory (overrides config and FRAMEBUS_DIR).
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show endpoints registered in the bus directory.
    List,
    /// Publish an animated test pattern under a name.
    Publish {
        /// Endpoint name to publish under.
        name: String,
        /// Pattern width in pixels (overrides config).
        #[arg(long)]
        width: Option<u32>,
        /// Pattern height in pixels (overrides config).
        #[arg(long)]
        height: Option<u32>,
        /// Target frames per second (overrides config).
        #[arg(long)]
        fps: Option<u8>,
        /// Stop after this many frames instead of running until Ctrl-C.
        #[arg(long)]
        frames: Option<u64>,
    },
    /// Subscribe to an endpoint and report frame statistics.
    Watch {
        /// Endpoint name to watch.
        name: String,
    },
    /// Fetch the most recent frame from an endpoint once.
    Acquire {
        /// Endpoint name to query.
        name: String,
        /// Write the packed pixel data to this file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&CliConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = CliConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Directory precedence: --dir, then config, then platform default.
    let dir = cli
        .dir
        .or_else(|| {
            if config.bus.dir.is_empty() {
                None
            } else {
                Some(PathBuf::from(&config.bus.dir))
            }
        })
        .unwrap_or_else(framebus_core::default_dir);

    match cli.command {
        Some(Command::List) => commands::list(&dir),
        Some(Command::Publish {
            name,
            width,
            height,
            fps,
            frames,
        }) => {
            let mut config = config;
            if let Some(width) = width {
                config.publish.width = width;
            }
            if let Some(height) = height {
                config.publish.height = height;
            }
            if let Some(fps) = fps {
                config.publish.fps = fps;
            }
            commands::publish(&dir, &name, &config, frames).await
        }
        Some(Command::Watch { name }) => commands::watch(&dir, &name).await,
        Some(Command::Acquire { name, output }) => commands::acquire(&dir, &name, output).await,
        None => {
            commands::list(&dir)?;
            Ok(())
        }
    }
}
