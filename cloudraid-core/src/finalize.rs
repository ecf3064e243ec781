//! Output finalization
//!
//! The engine hands every output piece to a [`Finalizer`] before exposing it
//! and tells it when the caller has released the piece. Two strategies
//! exist: [`TransferBacked`] for resumable transfers, which tracks per-chunk
//! integrity state, and [`DirectReadBacked`] for ephemeral streaming reads.

use crate::error::{CloudRaidError, Result};
use crate::piece::{ChunkMac, ChunkMacs, Piece};
use parking_lot::Mutex;
use std::collections::btree_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// First integrity chunk size; chunk `i` (1-based, up to 8) is `i` segments.
pub const CHUNK_SEGMENT: u64 = 128 * 1024;

/// Integrity chunk size once the progression has topped out (1 MiB).
pub const MAX_CHUNK: u64 = 8 * CHUNK_SEGMENT;

/// Block size a streaming cipher needs output aligned to.
pub const CIPHER_BLOCK: u64 = 16;

/// Start of the integrity chunk containing `pos`.
pub fn chunk_floor(pos: u64) -> u64 {
    let mut current = 0;
    let mut next = 0;
    for i in 1..=8 {
        next += i * CHUNK_SEGMENT;
        if pos < next {
            return current;
        }
        current = next;
    }
    ((pos - current) & !(MAX_CHUNK - 1)) + current
}

/// End of the integrity chunk containing `pos`, capped at `limit`.
pub fn chunk_ceil(pos: u64, limit: u64) -> u64 {
    let mut next = 0;
    for i in 1..=8 {
        next += i * CHUNK_SEGMENT;
        if pos < next {
            return next.min(limit);
        }
    }
    (((pos - next) | (MAX_CHUNK - 1)) + next + 1).min(limit)
}

/// In-place transform applied to output bytes (decryption, typically).
pub trait PieceCipher: Send + Sync {
    /// Transform `data`, whose first byte sits at absolute file offset `pos`.
    fn apply(&self, pos: u64, data: &mut [u8]);
}

/// Per-transfer output hooks injected into the engine.
pub trait Finalizer: Send {
    /// Prepare a piece for output: decrypt it and update its integrity state.
    fn finalize(&mut self, piece: &mut Piece) -> Result<()>;

    /// Given that file data up to `acquired_pos` is available, how far it
    /// may be finalized without splitting an integrity or cipher unit.
    fn output_chunk_pos(&self, acquired_pos: u64) -> u64;

    /// Called when the caller releases a piece after writing it.
    fn on_release(&mut self, _piece: &Piece) {}

    /// Canonical request cursor for non-striped downloads, when the
    /// surrounding bookkeeping owns one.
    fn shared_cursor(&self) -> Option<Arc<AtomicU64>> {
        None
    }
}

/// Persistent bookkeeping of a resumable transfer.
#[derive(Debug, Default)]
pub struct TransferState {
    /// Request cursor for non-striped downloads
    pos: Arc<AtomicU64>,
    /// Bytes released by the caller
    progress: AtomicU64,
    /// Integrity state of every chunk touched so far
    chunk_macs: Mutex<ChunkMacs>,
}

impl TransferState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current request cursor
    pub fn pos(&self) -> u64 {
        self.pos.load(Ordering::Acquire)
    }

    /// Bytes written out and released so far
    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Acquire)
    }

    /// Integrity state of the chunk starting at `chunk_start`.
    pub fn chunk_mac(&self, chunk_start: u64) -> Option<ChunkMac> {
        self.chunk_macs.lock().get(&chunk_start).cloned()
    }

    /// Digests of all fully covered chunks, in file order.
    pub fn completed_chunks(&self) -> Vec<(u64, blake3::Hash)> {
        self.chunk_macs
            .lock()
            .iter()
            .filter(|(_, mac)| mac.finished)
            .map(|(&start, mac)| (start, mac.digest()))
            .collect()
    }
}

/// Finalizer for resumable transfers.
///
/// Output is cut at integrity chunk boundaries so each chunk's digest can
/// be completed within one piece (except where a resume starts mid-chunk,
/// in which case the saved partial state is continued).
pub struct TransferBacked {
    state: Arc<TransferState>,
    file_size: u64,
    cipher: Option<Arc<dyn PieceCipher>>,
}

impl TransferBacked {
    pub fn new(state: Arc<TransferState>, file_size: u64) -> Self {
        Self {
            state,
            file_size,
            cipher: None,
        }
    }

    /// Apply `cipher` to every piece before digesting it.
    pub fn with_cipher(mut self, cipher: Arc<dyn PieceCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn state(&self) -> &Arc<TransferState> {
        &self.state
    }
}

impl Finalizer for TransferBacked {
    fn finalize(&mut self, piece: &mut Piece) -> Result<()> {
        if let Some(cipher) = &self.cipher {
            let pos = piece.pos;
            cipher.apply(pos, piece.data_mut());
        }

        let end = piece.end();
        let mut pos = piece.pos;
        while pos < end {
            let chunk_start = chunk_floor(pos);
            let chunk_end = chunk_ceil(pos, self.file_size);
            let upto = chunk_end.min(end);

            let mac = match piece.chunk_macs.entry(chunk_start) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(v) => v.insert(
                    self.state
                        .chunk_mac(chunk_start)
                        .unwrap_or_else(|| ChunkMac::starting_at(pos - chunk_start)),
                ),
            };
            if mac.offset != pos - chunk_start {
                return Err(CloudRaidError::SequenceViolation(format!(
                    "integrity chunk at {} continued from {} but fed at {}",
                    chunk_start,
                    chunk_start + mac.offset,
                    pos
                )));
            }

            let from = (pos - piece.pos) as usize;
            let to = (upto - piece.pos) as usize;
            mac.update(&piece.buf[from..to]);
            mac.finished = chunk_start + mac.offset == chunk_end;
            pos = upto;
        }
        Ok(())
    }

    fn output_chunk_pos(&self, acquired_pos: u64) -> u64 {
        if acquired_pos >= self.file_size {
            return self.file_size;
        }
        chunk_floor(acquired_pos)
    }

    fn on_release(&mut self, piece: &Piece) {
        self.state
            .progress
            .fetch_add(piece.len() as u64, Ordering::AcqRel);
        let mut macs = self.state.chunk_macs.lock();
        for (&start, mac) in &piece.chunk_macs {
            macs.insert(start, mac.clone());
        }
    }

    fn shared_cursor(&self) -> Option<Arc<AtomicU64>> {
        Some(self.state.pos.clone())
    }
}

/// Finalizer for ephemeral streaming reads: no integrity state, output
/// only needs cipher block alignment.
#[derive(Default)]
pub struct DirectReadBacked {
    delivered: Arc<AtomicU64>,
    cipher: Option<Arc<dyn PieceCipher>>,
}

impl DirectReadBacked {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn PieceCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Counter of bytes released by the reader.
    pub fn delivered(&self) -> Arc<AtomicU64> {
        self.delivered.clone()
    }
}

impl Finalizer for DirectReadBacked {
    fn finalize(&mut self, piece: &mut Piece) -> Result<()> {
        if let Some(cipher) = &self.cipher {
            let pos = piece.pos;
            cipher.apply(pos, piece.data_mut());
        }
        Ok(())
    }

    fn output_chunk_pos(&self, acquired_pos: u64) -> u64 {
        acquired_pos & !(CIPHER_BLOCK - 1)
    }

    fn on_release(&mut self, piece: &Piece) {
        self.delivered
            .fetch_add(piece.len() as u64, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIB: u64 = 1024;

    /// XORs each byte with the low byte of its file offset.
    struct OffsetCipher;

    impl PieceCipher for OffsetCipher {
        fn apply(&self, pos: u64, data: &mut [u8]) {
            for (i, b) in data.iter_mut().enumerate() {
                *b ^= (pos + i as u64) as u8;
            }
        }
    }

    #[test]
    fn test_chunk_boundaries() {
        assert_eq!(chunk_floor(0), 0);
        assert_eq!(chunk_floor(128 * KIB - 1), 0);
        assert_eq!(chunk_floor(128 * KIB), 128 * KIB);
        assert_eq!(chunk_floor(384 * KIB), 384 * KIB);
        // progression ends at 36 segments (4.5 MiB)
        let top = 36 * CHUNK_SEGMENT;
        assert_eq!(chunk_floor(top + 5), top);
        assert_eq!(chunk_floor(top + MAX_CHUNK + 5), top + MAX_CHUNK);

        assert_eq!(chunk_ceil(0, u64::MAX), 128 * KIB);
        assert_eq!(chunk_ceil(200 * KIB, u64::MAX), 384 * KIB);
        assert_eq!(chunk_ceil(top, u64::MAX), top + MAX_CHUNK);
        assert_eq!(chunk_ceil(top + 5, u64::MAX), top + MAX_CHUNK);
        assert_eq!(chunk_ceil(10, 100), 100);
    }

    #[test]
    fn test_transfer_backed_digests_whole_chunks() {
        let size = 400 * KIB;
        let data: Vec<u8> = (0..size).map(|i| (i % 253) as u8).collect();
        let state = TransferState::new();
        let mut finalizer = TransferBacked::new(state.clone(), size);

        let mut piece = Piece::from_bytes(0, &data);
        finalizer.finalize(&mut piece).unwrap();
        finalizer.on_release(&piece);

        assert_eq!(state.progress(), size);
        let chunks = state.completed_chunks();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], (0, blake3::hash(&data[..128 * 1024])));
        assert_eq!(
            chunks[1],
            (128 * KIB, blake3::hash(&data[128 * 1024..384 * 1024]))
        );
        // last chunk is cut short by the file size
        assert_eq!(chunks[2], (384 * KIB, blake3::hash(&data[384 * 1024..])));
    }

    #[test]
    fn test_transfer_backed_continues_partial_chunk() {
        let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let state = TransferState::new();
        let mut finalizer = TransferBacked::new(state.clone(), 1000);

        let mut first = Piece::from_bytes(0, &data[..300]);
        finalizer.finalize(&mut first).unwrap();
        finalizer.on_release(&first);
        assert!(state.completed_chunks().is_empty());

        let mut second = Piece::from_bytes(300, &data[300..]);
        finalizer.finalize(&mut second).unwrap();
        finalizer.on_release(&second);
        assert_eq!(state.completed_chunks(), vec![(0, blake3::hash(&data))]);
    }

    #[test]
    fn test_transfer_backed_rejects_gap() {
        let state = TransferState::new();
        let mut finalizer = TransferBacked::new(state, 1000);

        let mut first = Piece::from_bytes(0, [1u8; 100]);
        finalizer.finalize(&mut first).unwrap();
        finalizer.on_release(&first);

        let mut skipped = Piece::from_bytes(200, [1u8; 100]);
        assert!(matches!(
            finalizer.finalize(&mut skipped),
            Err(CloudRaidError::SequenceViolation(_))
        ));
    }

    #[test]
    fn test_transfer_backed_output_pos() {
        let finalizer = TransferBacked::new(TransferState::new(), 200 * KIB);
        assert_eq!(finalizer.output_chunk_pos(100 * KIB), 0);
        assert_eq!(finalizer.output_chunk_pos(150 * KIB), 128 * KIB);
        assert_eq!(finalizer.output_chunk_pos(200 * KIB), 200 * KIB);
        assert!(finalizer.shared_cursor().is_some());
    }

    #[test]
    fn test_direct_read_applies_cipher() {
        let mut finalizer = DirectReadBacked::new().with_cipher(Arc::new(OffsetCipher));
        let delivered = finalizer.delivered();

        let mut piece = Piece::from_bytes(256, [0u8; 4]);
        finalizer.finalize(&mut piece).unwrap();
        assert_eq!(piece.data(), &[0, 1, 2, 3]);

        finalizer.on_release(&piece);
        assert_eq!(delivered.load(Ordering::Acquire), 4);
        assert_eq!(finalizer.output_chunk_pos(1000), 992);
        assert!(finalizer.shared_cursor().is_none());
    }
}
