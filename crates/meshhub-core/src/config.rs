//! Configuration system for meshhub.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MESHHUB_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meshhub/config.toml
//!   3. ~/.config/meshhub/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default TCP port hubs accept on.
pub const DEFAULT_HUB_PORT: u16 = 17878;

/// Default port of the local status API.
pub const DEFAULT_API_PORT: u16 = 17879;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub hub: HubSection,
    pub network: NetworkConfig,
    pub timing: TimingConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSection {
    /// Human-readable name gossiped with our description. May be empty.
    pub name: String,
    /// Number of concurrent outbound connector loops.
    pub connectors: usize,
    /// Number of workers completing inbound handshakes.
    pub acceptor_workers: usize,
    /// Raw connections queued between the accept loop and the workers.
    pub incoming_queue: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local IP to bind the hub listener to.
    pub bind: String,
    /// TCP port for hub and client connections. 0 = OS-assigned.
    pub port: u16,
    /// Host part of the address we advertise. Empty = auto-detect.
    pub advertise_host: String,
    /// Hubs to contact at startup, as `host:port`.
    pub seeds: Vec<String>,
    /// Listen backlog.
    pub backlog: u32,
    /// If set, our hub address is written here once the listener is up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Interval between gossip rounds.
    pub gossip_interval_ms: u64,
    /// Minimum time between two connection attempts to the same hub.
    pub retry_delay_ms: u64,
    /// Timeout for connect and for each handshake read.
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    /// Status API port on 127.0.0.1.
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for HubSection {
    fn default() -> Self {
        Self {
            name: String::new(),
            connectors: 1,
            acceptor_workers: 4,
            incoming_queue: 64,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_HUB_PORT,
            advertise_host: String::new(),
            seeds: Vec::new(),
            backlog: 256,
            address_file: None,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            gossip_interval_ms: 3_000,
            retry_delay_ms: 15_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_API_PORT,
        }
    }
}

impl TimingConfig {
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("meshhub")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load a specific file, falling back to defaults if it does not exist.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(MeshConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MESHHUB_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MESHHUB_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MESHHUB_HUB__NAME") {
            self.hub.name = v;
        }
        if let Some(v) = lookup("MESHHUB_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Some(v) = lookup("MESHHUB_NETWORK__ADVERTISE_HOST") {
            self.network.advertise_host = v;
        }
        if let Some(v) = lookup("MESHHUB_NETWORK__SEEDS") {
            self.network.seeds = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("MESHHUB_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
        if let Some(v) = lookup("MESHHUB_API__ENABLED") {
            self.api.enabled = v == "true" || v == "1";
        }
    }
}
