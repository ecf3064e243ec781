//! Error types for CloudRaid
//!
//! Provides a unified error type for shard reassembly.

use thiserror::Error;

/// Result type alias for CloudRaid operations
pub type Result<T> = std::result::Result<T, CloudRaidError>;

/// Unified error type for CloudRaid
#[derive(Error, Debug)]
pub enum CloudRaidError {
    // ===== Geometry Errors =====
    #[error("Geometry mismatch: expected {expected} bytes, got {actual}")]
    GeometryMismatch { expected: u64, actual: u64 },

    #[error("Invalid URL count: {0} (expected 1 or 6)")]
    InvalidUrlCount(usize),

    #[error("Invalid connection index: {index} (max: {max})")]
    InvalidConnection { index: usize, max: usize },

    #[error("Invalid range: resume {resume_pos}, read to {read_to_pos}, file size {file_size}")]
    InvalidRange {
        resume_pos: u64,
        read_to_pos: u64,
        file_size: u64,
    },

    // ===== Fetch Errors =====
    #[error("Shard {shard} failed {failures} times, giving up")]
    ShardFetchFailure { shard: usize, failures: u32 },

    #[error("Shard {failed} failed while shard {excluded} is already excluded")]
    DoubleLoss { excluded: usize, failed: usize },

    // ===== Contract Errors =====
    #[error("Sequence violation: {0}")]
    SequenceViolation(String),

    #[error("Buffer manager is not configured")]
    NotConfigured,

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloudRaidError {
    /// Whether the whole transfer has to be abandoned.
    ///
    /// Everything except I/O is a protocol or contract failure that retrying
    /// the same call cannot fix.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CloudRaidError::Io(_))
    }
}
