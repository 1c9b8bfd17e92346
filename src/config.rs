//! Persistence for user preferences (config).
//!
//! `config.json` lives in the platform config directory
//! (`~/.config/pulse/` on Linux, `~/Library/Application Support/pulse/`
//! on macOS). Missing or invalid files fall back to defaults.

use crate::notify::NoticeDurations;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// User preferences (persisted to config.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the backend, e.g. `http://127.0.0.1:8700`
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Seconds a success notice stays visible
    #[serde(default = "default_success_notice_secs")]
    pub success_notice_secs: u64,
    /// Seconds an informational notice stays visible
    #[serde(default = "default_info_notice_secs")]
    pub info_notice_secs: u64,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8700".to_string()
}

fn default_success_notice_secs() -> u64 {
    5
}

fn default_info_notice_secs() -> u64 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            success_notice_secs: default_success_notice_secs(),
            info_notice_secs: default_info_notice_secs(),
        }
    }
}

impl Config {
    pub fn notice_durations(&self) -> NoticeDurations {
        NoticeDurations {
            success: Duration::from_secs(self.success_notice_secs),
            info: Duration::from_secs(self.info_notice_secs),
        }
    }

    /// WebSocket URL of the event stream endpoint, derived from the
    /// configured server URL.
    pub fn ws_events_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}/api/events")
    }
}

/// Pulse config directory (e.g. `~/.config/pulse/`).
fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("pulse"))
}

/// Load config from disk, returning defaults if the file is missing or invalid.
pub fn load_config() -> Config {
    let Some(path) = config_dir().map(|d| d.join("config.json")) else {
        return Config::default();
    };
    load_config_from(&path)
}

/// Save config to disk.
pub fn save_config(config: &Config) -> Result<(), std::io::Error> {
    let dir = config_dir().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "config dir not found")
    })?;
    save_config_to(config, &dir.join("config.json"))
}

// ---------------------------------------------------------------------------
// Path-parameterised helpers (used by public API and tests)
// ---------------------------------------------------------------------------

fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => Config::default(),
    }
}

fn save_config_to(config: &Config, path: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    atomic_write(path, json.as_bytes())
}

/// Write bytes to a file atomically: write to a temp file in the same
/// directory, then rename over the target. Prevents partial JSON on crash.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), std::io::Error> {
    use std::io::Write;

    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
