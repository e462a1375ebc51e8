//! Typed configuration.
//!
//! Loads once at startup from environment variables or a TOML file, and
//! fails fast on malformed values. Every field has a default, so an empty
//! environment yields a runnable local setup.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::queue::DEFAULT_CAPACITY;

/// File name of the persisted dedup cache inside the data directory.
pub const CACHE_FILE: &str = "file_hashes.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind: SocketAddr,
    /// Root for uploads, outputs and the dedup cache.
    pub data_dir: PathBuf,
    /// Jobs the work queue holds before activation waits.
    pub queue_capacity: usize,
    /// How long an accepted job may wait for its channel before it is pruned.
    pub pending_ttl_secs: u64,
    /// Largest accepted upload body.
    pub max_upload_bytes: usize,
    pub render_width: u32,
    pub render_height: u32,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir: PathBuf::from("."),
            queue_capacity: DEFAULT_CAPACITY,
            pending_ttl_secs: 600,
            max_upload_bytes: 64 * 1024 * 1024,
            render_width: 1024,
            render_height: 1024,
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            bind: parsed_var("RENDERQ_BIND")?.unwrap_or(defaults.bind),
            data_dir: std::env::var("RENDERQ_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            queue_capacity: parsed_var("RENDERQ_QUEUE_CAPACITY")?
                .unwrap_or(defaults.queue_capacity),
            pending_ttl_secs: parsed_var("RENDERQ_PENDING_TTL_SECS")?
                .unwrap_or(defaults.pending_ttl_secs),
            max_upload_bytes: parsed_var("RENDERQ_MAX_UPLOAD_BYTES")?
                .unwrap_or(defaults.max_upload_bytes),
            render_width: parsed_var("RENDERQ_RENDER_WIDTH")?.unwrap_or(defaults.render_width),
            render_height: parsed_var("RENDERQ_RENDER_HEIGHT")?
                .unwrap_or(defaults.render_height),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
        .validated()?)
    }

    /// Parse configuration from TOML text. Missing keys take defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| Error::Config(format!("bad config: {e}")))?;
        config.validated()
    }

    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.data_dir.join("output")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(CACHE_FILE)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    fn validated(self) -> Result<Self> {
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".to_string()));
        }
        if self.render_width == 0 || self.render_height == 0 {
            return Err(Error::Config("render size must be non-zero".to_string()));
        }
        Ok(self)
    }
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(None),
    }
}
