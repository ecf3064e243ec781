//! CloudRaid Core Library
//!
//! Reassembles a file's byte stream from parallel shard downloads.
//! This crate provides:
//! - Stripe geometry (5 data shards + 1 XOR parity shard, 16-byte sectors)
//! - Per-shard input buffering and line combination, with parity recovery
//! - Request range tracking, backpressure and single-shard failure recovery
//! - A pass-through path for non-striped files behind the same interface
//!
//! Transport, decryption and disk writes are left to the caller; the
//! [`finalize::Finalizer`] capability is the seam for the latter two.

pub mod backpressure;
pub mod combine;
pub mod config;
pub mod error;
pub mod finalize;
pub mod geometry;
pub mod manager;
pub mod piece;
pub mod recovery;
pub mod shard_input;
pub mod tracker;

pub use config::RaidConfig;
pub use error::{CloudRaidError, Result};
pub use finalize::{DirectReadBacked, Finalizer, PieceCipher, TransferBacked, TransferState};
pub use geometry::{shard_size, shard_sizes, stripe};
pub use manager::{RaidBufferManager, SharedRaidBufferManager};
pub use piece::{ChunkMac, ChunkMacs, Piece};
pub use recovery::FailureOutcome;
pub use tracker::NextRange;

/// Number of shards a striped file is split into (5 data + 1 parity).
pub const RAID_PARTS: usize = 6;

/// Number of data shards per stripe line.
pub const DATA_PARTS: usize = RAID_PARTS - 1;

/// Index of the parity shard. Data shards are `1..RAID_PARTS`.
pub const PARITY_PART: usize = 0;

/// Sector size in bytes: the unit each data shard contributes to a line.
pub const RAID_SECTOR: u64 = 16;

/// Bytes of file data carried by one stripe line.
pub const RAID_LINE: u64 = DATA_PARTS as u64 * RAID_SECTOR;

/// Extra capacity reserved behind every piece buffer so block ciphers can
/// run over the final partial block without reallocating.
pub const CIPHER_PADDING: usize = 16;
