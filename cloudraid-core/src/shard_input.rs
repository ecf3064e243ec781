//! Per-shard input buffering
//!
//! Each shard keeps a queue of received pieces that is contiguous from the
//! combine point, plus a position-indexed map of pieces that arrived ahead
//! of a gap (or were set aside when the shard was excluded). Pieces move
//! from the map into the queue as soon as the gap closes.

use crate::piece::Piece;
use std::collections::{BTreeMap, VecDeque};

/// How a submitted piece was taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// Appended to the contiguous queue
    Queued,
    /// Held in the map until the bytes before it arrive
    Held,
    /// Every byte was already buffered; the piece was dropped
    Duplicate,
    /// The piece lies wholly behind the combine point
    Behind,
}

#[derive(Debug, Default)]
pub struct ShardInput {
    queue: VecDeque<Piece>,
    queued: u64,
    ahead: BTreeMap<u64, Piece>,
}

impl ShardInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes contiguous from the combine point.
    pub fn queued_len(&self) -> u64 {
        self.queued
    }

    /// All bytes held beyond the combine point.
    pub fn held_len(&self) -> u64 {
        self.queued + self.ahead.values().map(|p| p.len() as u64).sum::<u64>()
    }

    /// End of the contiguous data, given the combine point `base`.
    pub fn contiguous_end(&self, base: u64) -> u64 {
        base + self.queued
    }

    /// Take in a piece of this shard. `base` is the combine point and
    /// `limit` the shard's end; bytes past it are dropped.
    pub fn accept(&mut self, base: u64, mut piece: Piece, limit: u64) -> Accepted {
        if piece.end() > limit {
            let keep = limit.saturating_sub(piece.pos) as usize;
            piece.truncate(keep);
        }
        if piece.end() <= base {
            return Accepted::Behind;
        }

        let end = self.contiguous_end(base);
        if piece.end() <= end {
            return Accepted::Duplicate;
        }

        if piece.pos > end {
            self.hold(piece);
            return Accepted::Held;
        }

        piece.advance((end - piece.pos) as usize);
        self.push(piece);
        self.drain_ahead(base);
        Accepted::Queued
    }

    /// Set a piece aside without queueing it. Returns false when it lies
    /// wholly behind `base` and was dropped.
    pub fn retain(&mut self, base: u64, mut piece: Piece) -> bool {
        if piece.end() <= base {
            return false;
        }
        if piece.pos < base {
            piece.advance((base - piece.pos) as usize);
        }
        self.hold(piece);
        true
    }

    /// Move everything queued into the map (the shard is being excluded).
    pub fn retain_all(&mut self) {
        self.queued = 0;
        while let Some(piece) = self.queue.pop_front() {
            self.hold(piece);
        }
    }

    /// Rebuild the queue from retained pieces once the shard is back in
    /// use. Bytes behind `base` are stale and discarded.
    pub fn restore(&mut self, base: u64) {
        self.retain_all();
        self.prune_behind(base);
        self.drain_ahead(base);
    }

    /// Drop retained bytes that the combine point has moved past.
    pub fn prune_behind(&mut self, base: u64) {
        let stale: Vec<u64> = self.ahead.range(..base).map(|(&pos, _)| pos).collect();
        for pos in stale {
            if let Some(piece) = self.ahead.remove(&pos) {
                self.retain(base, piece);
            }
        }
    }

    /// Copy the first `len` queued bytes, zero-filling past the queued data.
    pub fn gather(&self, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        for piece in &self.queue {
            let take = (len - out.len()).min(piece.len());
            out.extend_from_slice(&piece.data()[..take]);
            if out.len() == len {
                break;
            }
        }
        out.resize(len, 0);
        out
    }

    /// Discard `n` bytes from the front of the queue.
    pub fn consume(&mut self, n: u64) {
        let mut left = n.min(self.queued);
        self.queued -= left;
        while left > 0 {
            let Some(front) = self.queue.front_mut() else {
                break;
            };
            let len = front.len() as u64;
            if len <= left {
                left -= len;
                self.queue.pop_front();
            } else {
                front.advance(left as usize);
                left = 0;
            }
        }
    }

    fn push(&mut self, piece: Piece) {
        if piece.is_empty() {
            return;
        }
        self.queued += piece.len() as u64;
        self.queue.push_back(piece);
    }

    fn hold(&mut self, piece: Piece) {
        if piece.is_empty() {
            return;
        }
        let covered = self
            .ahead
            .get(&piece.pos)
            .is_some_and(|existing| existing.len() >= piece.len());
        if !covered {
            self.ahead.insert(piece.pos, piece);
        }
    }

    fn drain_ahead(&mut self, base: u64) {
        loop {
            let end = self.contiguous_end(base);
            let Some(entry) = self.ahead.first_entry() else {
                break;
            };
            if *entry.key() > end {
                break;
            }
            let mut piece = entry.remove();
            if piece.end() <= end {
                continue;
            }
            piece.advance((end - piece.pos) as usize);
            self.push(piece);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn piece(pos: u64, len: usize) -> Piece {
        let data: Vec<u8> = (0..len).map(|i| (pos as usize + i) as u8).collect();
        Piece::from_bytes(pos, data)
    }

    #[test]
    fn test_in_order_pieces_queue() {
        let mut input = ShardInput::new();
        assert_eq!(input.accept(0, piece(0, 32), 100), Accepted::Queued);
        assert_eq!(input.accept(0, piece(32, 32), 100), Accepted::Queued);
        assert_eq!(input.queued_len(), 64);
        assert_eq!(input.gather(40), piece(0, 40).data());
    }

    #[test]
    fn test_out_of_order_pieces_are_held_then_drained() {
        let mut input = ShardInput::new();
        assert_eq!(input.accept(0, piece(32, 16), 100), Accepted::Held);
        assert_eq!(input.accept(0, piece(64, 16), 100), Accepted::Held);
        assert_eq!(input.queued_len(), 0);
        assert_eq!(input.held_len(), 32);

        assert_eq!(input.accept(0, piece(0, 32), 100), Accepted::Queued);
        assert_eq!(input.queued_len(), 48);

        assert_eq!(input.accept(0, piece(48, 16), 100), Accepted::Queued);
        assert_eq!(input.queued_len(), 80);
        assert_eq!(input.gather(80), piece(0, 80).data());
    }

    #[test]
    fn test_overlap_is_trimmed_and_duplicates_dropped() {
        let mut input = ShardInput::new();
        input.accept(0, piece(0, 32), 100);
        assert_eq!(input.accept(0, piece(16, 16), 100), Accepted::Duplicate);
        assert_eq!(input.accept(0, piece(16, 32), 100), Accepted::Queued);
        assert_eq!(input.queued_len(), 48);
        assert_eq!(input.gather(48), piece(0, 48).data());
    }

    #[test]
    fn test_behind_base_and_past_limit() {
        let mut input = ShardInput::new();
        assert_eq!(input.accept(64, piece(32, 32), 100), Accepted::Behind);
        assert_eq!(input.accept(64, piece(64, 64), 100), Accepted::Queued);
        assert_eq!(input.queued_len(), 36);
    }

    #[test]
    fn test_consume_splits_pieces() {
        let mut input = ShardInput::new();
        input.accept(0, piece(0, 32), 100);
        input.accept(0, piece(32, 32), 100);

        input.consume(40);
        assert_eq!(input.queued_len(), 24);
        // queue now starts at 40
        assert_eq!(input.gather(24), piece(40, 24).data());
        // zero fill past the queued data
        assert_eq!(&input.gather(30)[24..], &[0u8; 6]);
    }

    #[test]
    fn test_retain_and_restore() {
        let mut input = ShardInput::new();
        input.accept(0, piece(0, 32), 100);
        input.accept(0, piece(48, 16), 100);
        input.retain_all();
        assert_eq!(input.queued_len(), 0);
        assert_eq!(input.held_len(), 48);

        // the combine point moved on to 16 while the shard was out
        input.restore(16);
        assert_eq!(input.queued_len(), 16);
        assert_eq!(input.gather(16), piece(16, 16).data());
        assert_eq!(input.held_len(), 32);
    }

    #[test]
    fn test_prune_behind_drops_stale() {
        let mut input = ShardInput::new();
        assert!(input.retain(0, piece(0, 16)));
        assert!(input.retain(0, piece(16, 32)));
        input.prune_behind(32);
        assert_eq!(input.held_len(), 16);
        assert!(!input.retain(32, piece(0, 16)));
    }
}
