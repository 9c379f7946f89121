//! Sync engine configuration.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the sync engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the collection server (e.g., "https://collector.example.org").
    pub server_base_url: String,

    /// Sent as `app_version` with every form request.
    pub app_version: String,

    /// Root directory for registered files, downloads and local state.
    pub data_dir: PathBuf,

    /// Login token file, relative to `data_dir`.
    pub credential_path: PathBuf,

    /// SQLite database file, relative to `data_dir`.
    pub database_file: PathBuf,

    /// Read/write granularity for digests and uploads; the pause signal is
    /// checked after each chunk.
    pub chunk_size_bytes: usize,

    /// Timeout for form requests and zero-length protocol calls.
    pub request_timeout_secs: u64,

    /// Timeout for a single streamed upload or download.
    pub transfer_timeout_secs: u64,

    /// Accept self-signed certificates (local development servers only).
    pub accept_invalid_certs: bool,
}

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_base_url: "https://localhost:8050".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::from("."),
            credential_path: PathBuf::from("config").join("loginToken.txt"),
            database_file: PathBuf::from("sync.db"),
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            request_timeout_secs: 30,
            transfer_timeout_secs: 3600,
            accept_invalid_certs: true, // default server is a local self-signed one
        }
    }
}

impl SyncConfig {
    /// A config for `server_base_url` rooted at `data_dir`.
    pub fn new(server_base_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        let server_base_url = server_base_url.into();
        let accept_invalid_certs = server_base_url.starts_with("https://localhost");
        Self {
            server_base_url,
            data_dir: data_dir.into(),
            accept_invalid_certs,
            ..Self::default()
        }
    }

    /// Loads a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.server_base_url.trim().is_empty() {
            return Err(SyncError::Config("server_base_url is empty".to_string()));
        }
        if self.chunk_size_bytes == 0 {
            return Err(SyncError::Config("chunk_size_bytes must be positive".to_string()));
        }
        Ok(())
    }

    /// `server_base_url` joined with an endpoint path such as `/save`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.server_base_url.trim_end_matches('/'), path)
    }

    /// Absolute location of a file given relative to `data_dir`.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.data_dir.join(relative)
    }

    pub fn credential_file(&self) -> PathBuf {
        self.resolve(&self.credential_path)
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve(&self.database_file)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}
