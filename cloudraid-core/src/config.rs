//! Reassembly tunables
//!
//! Loaded from defaults, environment variables (`CLOUDRAID_*`) or a TOML
//! table deserialized by the caller.

use crate::error::{CloudRaidError, Result};
use crate::{RAID_LINE, RAID_PARTS};
use serde::{Deserialize, Serialize};

/// Lower bound for derived lines per chunk (128 KiB of shard data)
pub const MIN_LINES_PER_CHUNK: u64 = 8 * 1024;

/// Upper bound for derived lines per chunk (1 MiB of shard data)
pub const MAX_LINES_PER_CHUNK: u64 = 64 * 1024;

/// Tunables for the striped reassembly engine.
///
/// Thresholds are counted in chunks, where one chunk is `lines_per_chunk`
/// stripe lines (one shard request's worth of data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaidConfig {
    /// Stripe lines per request and per chunk; derived from the maximum
    /// request size when unset.
    pub lines_per_chunk: Option<u64>,

    /// Most chunks combined in one call, bounding peak memory
    pub max_chunks_per_combine: u64,

    /// Chunks held beyond the combine point at which a shard is paused
    pub pause_chunks: u64,

    /// Chunks held beyond the combine point below which a paused shard resumes
    pub unpause_chunks: u64,

    /// Cumulative failures of one shard before the transfer is given up
    pub retry_budget: u32,
}

impl Default for RaidConfig {
    fn default() -> Self {
        Self {
            lines_per_chunk: None,
            max_chunks_per_combine: 5,
            pause_chunks: 8,
            unpause_chunks: 4,
            retry_budget: 3,
        }
    }
}

impl RaidConfig {
    /// Configuration where every threshold counts single stripe lines.
    pub fn per_line() -> Self {
        Self {
            lines_per_chunk: Some(1),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let lines_per_chunk = match lookup("CLOUDRAID_LINES_PER_CHUNK") {
            Some(v) => Some(parse_value("CLOUDRAID_LINES_PER_CHUNK", &v)?),
            None => defaults.lines_per_chunk,
        };

        let config = Self {
            lines_per_chunk,
            max_chunks_per_combine: env_or(
                &lookup,
                "CLOUDRAID_MAX_CHUNKS_PER_COMBINE",
                defaults.max_chunks_per_combine,
            )?,
            pause_chunks: env_or(&lookup, "CLOUDRAID_PAUSE_CHUNKS", defaults.pause_chunks)?,
            unpause_chunks: env_or(&lookup, "CLOUDRAID_UNPAUSE_CHUNKS", defaults.unpause_chunks)?,
            retry_budget: env_or(&lookup, "CLOUDRAID_RETRY_BUDGET", defaults.retry_budget)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.lines_per_chunk == Some(0) {
            return Err(CloudRaidError::Configuration(
                "lines_per_chunk must be > 0".to_string(),
            ));
        }
        if self.max_chunks_per_combine == 0 {
            return Err(CloudRaidError::Configuration(
                "max_chunks_per_combine must be > 0".to_string(),
            ));
        }
        if self.unpause_chunks >= self.pause_chunks {
            return Err(CloudRaidError::Configuration(format!(
                "unpause_chunks ({}) must be below pause_chunks ({})",
                self.unpause_chunks, self.pause_chunks
            )));
        }
        if self.retry_budget == 0 {
            return Err(CloudRaidError::Configuration(
                "retry_budget must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Lines per chunk for a transfer whose requests may be up to
    /// `max_request_size` bytes.
    ///
    /// A request covers all six shards, so the size is divided across them,
    /// then rounded down to a multiple of 1024 lines and clamped.
    pub fn resolve_lines_per_chunk(&self, max_request_size: u64) -> u64 {
        if let Some(lines) = self.lines_per_chunk {
            return lines;
        }
        let lines = max_request_size / (RAID_PARTS as u64 * RAID_LINE);
        let lines = lines - lines % 1024;
        lines.clamp(MIN_LINES_PER_CHUNK, MAX_LINES_PER_CHUNK)
    }
}

fn env_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(v) => parse_value(key, &v),
        None => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        CloudRaidError::Configuration(format!("Invalid value for {}: {}", key, value))
    })
}
