//! Configuration management
//!
//! Config directory: ~/.cloudraid/ (cross-platform)
//!
//! Config file format (~/.cloudraid/config.toml):
//! ```toml
//! [raid]
//! max_chunks_per_combine = 5
//! pause_chunks = 8
//! unpause_chunks = 4
//! retry_budget = 3
//!
//! [fetch]
//! max_request_size = 16777216
//! connections = 1
//! ```
//!
//! Without a config file the `[raid]` values come from `CLOUDRAID_*`
//! environment variables.

use anyhow::{Context, Result};
use cloudraid_core::RaidConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Structure of ~/.cloudraid/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CloudRaidConfig {
    /// Reassembly engine tunables
    #[serde(default)]
    pub raid: RaidConfig,

    /// Fetch driver settings
    #[serde(default)]
    pub fetch: FetchSettings,
}

/// Fetch driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Largest request issued on one connection, in bytes
    #[serde(default = "default_max_request_size")]
    pub max_request_size: u64,

    /// Connections used for plain (non-striped) files
    #[serde(default = "default_connections")]
    pub connections: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_request_size: default_max_request_size(),
            connections: default_connections(),
        }
    }
}

fn default_max_request_size() -> u64 {
    std::env::var("CLOUDRAID_MAX_REQUEST_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(16 * 1024 * 1024)
}

fn default_connections() -> usize {
    1
}

/// Get the config directory path (~/.cloudraid/)
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let config_dir = home.join(".cloudraid");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory ~/.cloudraid/")?;
    }

    Ok(config_dir)
}

/// Get the config file path
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load configuration from file, falling back to the environment and
/// defaults if it doesn't exist
pub fn load_config() -> Result<CloudRaidConfig> {
    let path = config_file_path()?;
    if !path.exists() {
        return Ok(CloudRaidConfig {
            raid: RaidConfig::from_env()?,
            fetch: FetchSettings::default(),
        });
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

/// Parse and validate a config file's contents
pub fn parse_config(content: &str) -> Result<CloudRaidConfig> {
    let config: CloudRaidConfig = toml::from_str(content).context("Failed to parse config")?;
    config.raid.validate()?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &CloudRaidConfig) -> Result<()> {
    let path = config_file_path()?;
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(&path, content).context("Failed to write config file")?;
    Ok(())
}
