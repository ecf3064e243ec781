//! Read-ahead limits
//!
//! A shard that races ahead of its peers holds data that cannot be combined
//! yet. Once it holds `pause` chunks contiguous from the combine point it
//! stops requesting, and stays stopped until it is back down to `unpause`.
//! Data held past a gap in the shard does not count: the shard still has to
//! fetch the gap before any of it can be combined.

use crate::config::RaidConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backpressure {
    chunk_bytes: u64,
    pause_chunks: u64,
    unpause_chunks: u64,
}

impl Backpressure {
    pub fn new(config: &RaidConfig, chunk_bytes: u64) -> Self {
        Self {
            chunk_bytes: chunk_bytes.max(1),
            pause_chunks: config.pause_chunks,
            unpause_chunks: config.unpause_chunks,
        }
    }

    /// Whole chunks represented by `held_bytes`.
    pub fn chunks(&self, held_bytes: u64) -> u64 {
        held_bytes / self.chunk_bytes
    }

    /// Pause state for a shard holding `held_bytes`, given its current state.
    pub fn evaluate(&self, held_bytes: u64, paused: bool) -> bool {
        let held = self.chunks(held_bytes);
        held >= self.pause_chunks || (paused && held > self.unpause_chunks)
    }
}
