//! Configuration system for the `todosync` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/todosync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::store::FileStore;
use crate::store::cache::DEFAULT_KEY;
use crate::sync::DEFAULT_UPDATE_BUFFER;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The relay URL is not a usable WebSocket URL.
    #[error("invalid relay URL {url:?}: {reason}")]
    InvalidRelayUrl {
        /// The configured value.
        url: String,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    backend: BackendFileConfig,
    session: SessionFileConfig,
    storage: StorageFileConfig,
}

/// `[backend]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackendFileConfig {
    relay_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    update_buffer: Option<usize>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    email: Option<String>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_dir: Option<PathBuf>,
    key: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay server WebSocket URL; `None` runs local-only.
    pub relay_url: Option<String>,
    /// Timeout for connecting to the relay server.
    pub connect_timeout: Duration,
    /// Capacity of the inbound change-notification channel.
    pub update_buffer: usize,
    /// Email to sign in with at startup.
    pub email: Option<String>,
    /// Directory holding the local task cache.
    pub data_dir: PathBuf,
    /// Storage key of the cached snapshot.
    pub storage_key: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            connect_timeout: Duration::from_secs(10),
            update_buffer: DEFAULT_UPDATE_BUFFER,
            email: None,
            data_dir: FileStore::default_root()
                .unwrap_or_else(|| std::env::temp_dir().join("todosync")),
            storage_key: DEFAULT_KEY.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            relay_url: cli
                .relay_url
                .clone()
                .or_else(|| file.backend.relay_url.clone())
                .filter(|url| !url.trim().is_empty()),
            connect_timeout: file
                .backend
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            update_buffer: file
                .backend
                .update_buffer
                .unwrap_or(defaults.update_buffer),
            email: cli.email.clone().or_else(|| file.session.email.clone()),
            data_dir: cli
                .data_dir
                .clone()
                .or_else(|| file.storage.data_dir.clone())
                .unwrap_or(defaults.data_dir),
            storage_key: file
                .storage
                .key
                .clone()
                .unwrap_or(defaults.storage_key),
        }
    }

    /// The relay URL parsed and checked for a `ws`/`wss` scheme.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRelayUrl`] if the configured value is
    /// not a WebSocket URL.
    pub fn relay_endpoint(&self) -> Result<Option<Url>, ConfigError> {
        let Some(raw) = self.relay_url.as_deref() else {
            return Ok(None);
        };
        let url = Url::parse(raw).map_err(|e| ConfigError::InvalidRelayUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(Some(url)),
            other => Err(ConfigError::InvalidRelayUrl {
                url: raw.to_string(),
                reason: format!("unsupported scheme {other:?}, expected ws or wss"),
            }),
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Categorized to-do list with live sync")]
pub struct CliArgs {
    /// WebSocket URL of the todosync relay.
    #[arg(long, env = "TODOSYNC_RELAY_URL")]
    pub relay_url: Option<String>,

    /// Email address to sign in with at startup.
    #[arg(long, env = "TODOSYNC_EMAIL")]
    pub email: Option<String>,

    /// Directory for the local task cache.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Path to config file (default: `~/.config/todosync/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TODOSYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/todosync.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist. Otherwise the default
/// path is tried and a missing file is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("todosync").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
