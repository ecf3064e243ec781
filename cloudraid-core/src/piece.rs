//! Positioned byte buffers
//!
//! A [`Piece`] is the unit that moves through the pipeline: received from the
//! transport, queued per shard, combined, exposed as output and finally
//! released. Pieces are move-only; every stage owns them exclusively.

use crate::CIPHER_PADDING;
use bytes::{Buf, BytesMut};
use std::collections::BTreeMap;
use std::fmt;

/// Integrity state of a piece, keyed by the absolute start of each
/// integrity chunk the piece overlaps.
pub type ChunkMacs = BTreeMap<u64, ChunkMac>;

/// Running digest over one integrity chunk.
///
/// A chunk may be fed across several pieces (a resumed transfer starts
/// mid-chunk), so the accumulator remembers how far into the chunk it is.
#[derive(Clone)]
pub struct ChunkMac {
    /// Offset within the chunk up to which data has been folded in.
    pub offset: u64,
    /// Set once the accumulator has seen the chunk's last byte.
    pub finished: bool,
    hasher: blake3::Hasher,
}

impl ChunkMac {
    /// Accumulator for a chunk whose first `offset` bytes are not covered.
    pub fn starting_at(offset: u64) -> Self {
        Self {
            offset,
            finished: false,
            hasher: blake3::Hasher::new(),
        }
    }

    /// Fold more chunk bytes into the accumulator.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.offset += data.len() as u64;
    }

    /// Digest of everything folded in so far.
    pub fn digest(&self) -> blake3::Hash {
        self.hasher.finalize()
    }
}

impl Default for ChunkMac {
    fn default() -> Self {
        Self::starting_at(0)
    }
}

impl fmt::Debug for ChunkMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkMac")
            .field("offset", &self.offset)
            .field("finished", &self.finished)
            .finish()
    }
}

/// An owned byte buffer tagged with its absolute file (or shard) position.
#[derive(Debug, Default)]
pub struct Piece {
    /// Absolute position of the first byte in `buf`
    pub pos: u64,
    /// Data, with [`CIPHER_PADDING`] spare capacity behind it
    pub buf: BytesMut,
    /// Integrity state filled in by the finalizer
    pub chunk_macs: ChunkMacs,
}

impl Piece {
    /// Create a zero-filled piece of `len` bytes at `pos`.
    pub fn new(pos: u64, len: usize) -> Self {
        let mut buf = BytesMut::with_capacity(len + CIPHER_PADDING);
        buf.resize(len, 0);
        Self {
            pos,
            buf,
            chunk_macs: ChunkMacs::new(),
        }
    }

    /// Create an empty piece anchored at `pos`.
    pub fn empty(pos: u64) -> Self {
        Self::new(pos, 0)
    }

    /// Copy `data` into a new piece at `pos`.
    pub fn from_bytes(pos: u64, data: impl AsRef<[u8]>) -> Self {
        let data = data.as_ref();
        let mut buf = BytesMut::with_capacity(data.len() + CIPHER_PADDING);
        buf.extend_from_slice(data);
        Self {
            pos,
            buf,
            chunk_macs: ChunkMacs::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Position one past the last byte.
    pub fn end(&self) -> u64 {
        self.pos + self.buf.len() as u64
    }

    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Append `other`, which must start where this piece ends, consuming it.
    pub fn absorb(&mut self, other: Piece) {
        debug_assert_eq!(self.end(), other.pos, "absorbed piece is not contiguous");
        if self.buf.is_empty() {
            self.pos = other.pos;
            self.buf = other.buf;
            self.buf.reserve(CIPHER_PADDING);
        } else {
            self.buf.extend_from_slice(&other.buf);
        }
        self.chunk_macs.extend(other.chunk_macs);
    }

    /// Split off everything from byte `at` onwards into a new piece.
    ///
    /// Integrity state stays with `self`; it is only ever computed on pieces
    /// that are about to be handed out whole.
    pub fn split_off(&mut self, at: usize) -> Piece {
        let mut tail = self.buf.split_off(at);
        tail.reserve(CIPHER_PADDING);
        self.buf.reserve(CIPHER_PADDING);
        Piece {
            pos: self.pos + at as u64,
            buf: tail,
            chunk_macs: ChunkMacs::new(),
        }
    }

    /// Drop the first `n` bytes, moving the position forward.
    pub fn advance(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
        self.pos += n as u64;
    }

    /// Keep only the first `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }
}
