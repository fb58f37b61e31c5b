//! Endpoint registry — how consumers find publishers by name.
//!
//! Every live endpoint owns one JSON record in the bus directory:
//!
//! ```text
//! <bus dir>/<sanitized name>.json
//!   { "name": "...", "port": ..., "pid": ..., "protocol_version": ..., "started_unix_ms": ... }
//! ```
//!
//! Records are written atomically (temp file + rename) and removed on
//! `stop`. A record whose listener no longer answers is *stale*;
//! staleness is detected at connect time, not here.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::BusError;
use crate::message::EndpointInfo;

/// Maximum endpoint name length in bytes.
pub const MAX_NAME_LEN: usize = 128;

// ── Bus directory ────────────────────────────────────────────────

/// Resolve the bus directory.
///
/// Order: `$FRAMEBUS_DIR`, then `$XDG_RUNTIME_DIR/framebus`, then a
/// per-user directory under the system temp dir.
pub fn default_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FRAMEBUS_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") {
        if !runtime.is_empty() {
            return Path::new(&runtime).join("framebus");
        }
    }
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "shared".into());
    std::env::temp_dir().join(format!("framebus-{user}"))
}

// ── Names ────────────────────────────────────────────────────────

/// Validate a public endpoint name.
pub fn validate_name(name: &str) -> Result<(), BusError> {
    if name.is_empty() {
        return Err(BusError::InvalidName("name is empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(BusError::InvalidName(format!(
            "name exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    if sanitize(name).is_empty() {
        return Err(BusError::InvalidName(
            "name contains no usable characters".into(),
        ));
    }
    Ok(())
}

/// Map a public name to a safe file stem. Characters outside
/// `[A-Za-z0-9._-]` become `-`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

/// Path of the record file for `name` inside `dir`.
pub fn record_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.json", sanitize(name)))
}

// ── EndpointRecord ───────────────────────────────────────────────

/// The on-disk registration of a live endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointRecord {
    /// Public endpoint name (unsanitized).
    pub name: String,
    /// Loopback port the endpoint listens on.
    pub port: u16,
    /// Publishing process id.
    pub pid: u32,
    /// Protocol version the endpoint speaks.
    pub protocol_version: u32,
    /// Unix timestamp (milliseconds) of endpoint start.
    pub started_unix_ms: u64,
}

impl EndpointRecord {
    pub fn new(name: impl Into<String>, port: u16, protocol_version: u32) -> Self {
        Self {
            name: name.into(),
            port,
            pid: std::process::id(),
            protocol_version,
            started_unix_ms: unix_ms(),
        }
    }

    /// Loopback address of the endpoint listener.
    pub fn addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from(([127, 0, 0, 1], self.port))
    }

    /// Handshake identity corresponding to this record.
    pub fn info(&self) -> EndpointInfo {
        EndpointInfo {
            name: self.name.clone(),
            pid: self.pid,
            protocol_version: self.protocol_version,
            started_unix_ms: self.started_unix_ms,
        }
    }

    /// Write the record atomically into `dir`, returning the record
    /// path.
    pub fn write(&self, dir: &Path) -> Result<PathBuf, BusError> {
        std::fs::create_dir_all(dir)?;
        let path = record_path(dir, &self.name);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| BusError::Registry(format!("serialize record: {e}")))?;
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    fn load(path: &Path) -> Result<Self, BusError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| BusError::Registry(format!("parse {}: {e}", path.display())))
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Lookup ───────────────────────────────────────────────────────

/// Load the record for `name`, if one exists.
///
/// An unreadable record is treated as stale: it is removed and
/// reported as absent.
pub fn resolve(dir: &Path, name: &str) -> Result<Option<EndpointRecord>, BusError> {
    let path = record_path(dir, name);
    if !path.exists() {
        return Ok(None);
    }
    match EndpointRecord::load(&path) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            tracing::warn!("removing unreadable endpoint record {}: {e}", path.display());
            let _ = std::fs::remove_file(&path);
            Ok(None)
        }
    }
}

/// Remove the record for `name`. Missing files are not an error.
pub fn remove(dir: &Path, name: &str) {
    let path = record_path(dir, name);
    if let Err(e) = std::fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("failed to remove endpoint record {}: {e}", path.display());
        }
    }
}

/// Enumerate all registered endpoints in `dir`. Unreadable records
/// are skipped. A missing directory yields an empty list.
pub fn list_endpoints(dir: &Path) -> Result<Vec<EndpointRecord>, BusError> {
    let mut records = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match EndpointRecord::load(&path) {
            Ok(record) => records.push(record),
            Err(e) => tracing::debug!("skipping {}: {e}", path.display()),
        }
    }
    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}

// ── Tests ────────────────────────────────────────────────────────
