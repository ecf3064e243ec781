//! Request position tracking
//!
//! Striped downloads track one request cursor per shard, in shard-local
//! bytes. Non-striped downloads track a single cursor through the whole
//! file, which for resumable transfers is owned by the transfer's own
//! bookkeeping and merely mirrored here.

use crate::RAID_PARTS;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What to do next on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextRange {
    /// First byte to request (file offset, or shard offset when striped)
    pub start: u64,
    /// One past the last byte to request
    pub end: u64,
    /// Output for this connection was produced from already-buffered data;
    /// fetch it with `get_output_buffer` instead of issuing a request.
    pub supplied_from_buffer: bool,
    /// This shard is too far ahead of its peers; don't request for now.
    pub should_pause: bool,
}

impl NextRange {
    pub fn request(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            supplied_from_buffer: false,
            should_pause: false,
        }
    }

    /// Nothing to request at `pos`.
    pub fn idle(pos: u64) -> Self {
        Self::request(pos, pos)
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Request cursors, selected when the download mode becomes known.
#[derive(Debug, Default)]
pub enum PositionTracker {
    /// Mode not known yet
    #[default]
    Unknown,
    /// One cursor through the whole file, shared by all connections
    Single { cursor: Arc<AtomicU64> },
    /// One cursor per shard
    Raid { part_pos: [u64; RAID_PARTS] },
}

impl PositionTracker {
    /// Tracker for a non-striped download, mirroring `shared` when given.
    pub fn single(shared: Option<Arc<AtomicU64>>, start: u64) -> Self {
        let cursor = shared.unwrap_or_default();
        cursor.store(start, Ordering::Release);
        PositionTracker::Single { cursor }
    }

    pub fn raid(start: u64) -> Self {
        PositionTracker::Raid {
            part_pos: [start; RAID_PARTS],
        }
    }

    /// Current request position for `connection`.
    pub fn pos(&self, connection: usize) -> u64 {
        match self {
            PositionTracker::Unknown => 0,
            PositionTracker::Single { cursor } => cursor.load(Ordering::Acquire),
            PositionTracker::Raid { part_pos } => part_pos[connection],
        }
    }

    pub fn set_pos(&mut self, connection: usize, pos: u64) {
        match self {
            PositionTracker::Unknown => {}
            PositionTracker::Single { cursor } => cursor.store(pos, Ordering::Release),
            PositionTracker::Raid { part_pos } => part_pos[connection] = pos,
        }
    }
}

/// Next range for a non-striped download.
///
/// Requests run up to `max_request_size` bytes, stop at `deliver_limit`,
/// and otherwise end on a boundary `align` accepts when one lies ahead.
pub fn single_range(
    cursor: u64,
    max_request_size: u64,
    deliver_limit: u64,
    align: impl Fn(u64) -> u64,
) -> NextRange {
    if cursor >= deliver_limit {
        return NextRange::idle(deliver_limit);
    }
    let mut end = cursor.saturating_add(max_request_size).min(deliver_limit);
    if end < deliver_limit {
        let aligned = align(end);
        if aligned > cursor {
            end = aligned;
        }
    }
    NextRange::request(cursor, end)
}

/// Next range for one shard of a striped download.
pub fn shard_range(part_pos: u64, part_end: u64, request_bytes: u64) -> NextRange {
    if part_pos >= part_end {
        return NextRange::idle(part_pos);
    }
    NextRange::request(part_pos, part_pos.saturating_add(request_bytes).min(part_end))
}
