//! Configuration for the CareCompass server.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Persistence backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Whole database in one JSON file
    #[default]
    JsonFile,
    /// Append-only mutation journal replayed on start
    Journal,
    /// Nothing is persisted
    Memory,
}

impl FromStr for BackendKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json_file" | "json" => Ok(BackendKind::JsonFile),
            "journal" => Ok(BackendKind::Journal),
            "memory" => Ok(BackendKind::Memory),
            other => Err(CoreError::Config(format!("unknown backend: {other}"))),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Data directory for the database files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Persistence backend
    #[serde(default)]
    pub backend: BackendKind,

    /// Session lifetime in seconds (default: 24h)
    #[serde(default = "default_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Share link lifetime in seconds (default: 24h)
    #[serde(default = "default_ttl_secs")]
    pub share_link_ttl_secs: u64,

    /// How often expired sessions and share links are swept
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Directory of static frontend files, if any
    #[serde(default)]
    pub public_dir: Option<PathBuf>,

    /// Base URL used when building share links
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".carecompass")
}

fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            data_dir: default_data_dir(),
            backend: BackendKind::default(),
            session_ttl_secs: default_ttl_secs(),
            share_link_ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            public_dir: None,
            public_base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment, falling back to defaults
    pub fn load() -> Self {
        let data_dir = std::env::var("CARECOMPASS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());
        let config_path = data_dir.join("config.yaml");

        let mut config = Self {
            data_dir,
            ..Self::default()
        };

        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(loaded) => config = loaded,
                Err(e) => {
                    tracing::warn!("Failed to load config file: {}", e);
                }
            }
        }

        config.apply_env();
        config
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Apply `PORT`, `CARECOMPASS_DATA_DIR` and `CARECOMPASS_BACKEND` overrides
    pub fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(e) => tracing::warn!("Invalid PORT value {:?}: {}", port, e),
            }
        }

        if let Ok(dir) = std::env::var("CARECOMPASS_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Ok(backend) = std::env::var("CARECOMPASS_BACKEND") {
            match backend.parse() {
                Ok(kind) => self.backend = kind,
                Err(e) => tracing::warn!("{}", e),
            }
        }
    }

    /// `host:port` string for the listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Base URL for share links, defaulting to the local listener
    pub fn share_base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.port),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn share_link_ttl(&self) -> Duration {
        Duration::from_secs(self.share_link_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Path of the flat JSON database
    pub fn json_db_path(&self) -> PathBuf {
        self.data_dir.join("db.json")
    }

    /// Path of the mutation journal
    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("journal.jsonl")
    }

    /// Ensure data directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}
