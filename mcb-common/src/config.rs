//! Configuration loading and resolution
//!
//! Priority order, highest first:
//! 1. Command-line argument (config path passed through by the binary)
//! 2. `MCB_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/mcb/config.toml`)
//!
//! A missing or unreadable config file never terminates the client; it logs
//! a warning and falls back to compiled defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Upload channel endpoint and reconnection policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub host: String,
    pub port: u16,
    /// Bounded reconnect attempts before the channel task gives up
    pub reconnect_attempts: u32,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5725,
            reconnect_attempts: 10,
            reconnect_delay_ms: 3000,
        }
    }
}

/// Repository API endpoints used for title lookup and denylist refresh.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// MediaWiki api.php base URL
    pub base_url: String,
    /// Page holding literal filename prefixes, one per line
    pub prefix_page: String,
    /// Page holding title patterns in the MediaWiki blacklist dialect
    pub pattern_page: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://commons.wikimedia.org/w/api.php".to_string(),
            prefix_page: "MediaWiki:Filename-prefix-blacklist".to_string(),
            pattern_page: "MediaWiki:Titleblacklist".to_string(),
        }
    }
}

/// Batch defaults applied where per-item metadata is empty.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Collection source handler name
    pub handler: String,
    /// Default caption/description language
    pub language: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            handler: "mapillary".to_string(),
            language: "en".to_string(),
        }
    }
}

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub channel: ChannelConfig,
    pub api: ApiConfig,
    pub upload: UploadConfig,
}

impl TomlConfig {
    /// Parse a config file, erroring on unreadable or malformed content.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Resolve and load configuration with graceful degradation.
    ///
    /// A config file that exists but fails to parse is an error (silent
    /// fallback would mask typos); a file that simply is not there falls
    /// back to defaults with a warning.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::from_file(path);
        }

        if let Ok(env_path) = std::env::var("MCB_CONFIG") {
            return Self::from_file(Path::new(&env_path));
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                tracing::warn!("no config file found, using compiled defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Platform default config file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mcb").join("config.toml"))
}
