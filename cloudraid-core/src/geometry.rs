//! Stripe geometry
//!
//! A striped file is cut into lines of [`RAID_LINE`] bytes. Each line puts
//! one [`RAID_SECTOR`]-byte sector into each of the five data shards
//! (shards 1..=5, in file order) and the XOR of those sectors into the
//! parity shard (shard 0). The last line may be short: data sectors past the
//! end of the file are simply absent, short ones are truncated, and parity
//! covers the longest sector of that line, which is always shard 1's.
//!
//! The size split must match the producer byte for byte, so everything here
//! is pure and derived from the file size alone.

use crate::error::{CloudRaidError, Result};
use crate::{DATA_PARTS, PARITY_PART, RAID_LINE, RAID_PARTS, RAID_SECTOR};
use rayon::prelude::*;

/// Size in bytes of shard `part` for a file of `full_file_size` bytes.
pub fn shard_size(part: usize, full_file_size: u64) -> u64 {
    debug_assert!(part < RAID_PARTS);
    let remainder = full_file_size % RAID_LINE;
    // parity (0) is sized like the first data shard
    let slot = part.max(1) as u64 - 1;
    let tail = remainder
        .saturating_sub(slot * RAID_SECTOR)
        .min(RAID_SECTOR);
    (full_file_size - remainder) / DATA_PARTS as u64 + tail
}

/// Sizes of all six shards, indexed by shard.
pub fn shard_sizes(full_file_size: u64) -> [u64; RAID_PARTS] {
    std::array::from_fn(|part| shard_size(part, full_file_size))
}

/// Check shard sizes reported by a source against the file size.
pub fn verify_shard_sizes(sizes: &[u64], full_file_size: u64) -> Result<()> {
    if sizes.len() != RAID_PARTS {
        return Err(CloudRaidError::InvalidUrlCount(sizes.len()));
    }

    let data_total: u64 = sizes[1..].iter().sum();
    if data_total != full_file_size {
        return Err(CloudRaidError::GeometryMismatch {
            expected: full_file_size,
            actual: data_total,
        });
    }

    for (part, &actual) in sizes.iter().enumerate() {
        let expected = shard_size(part, full_file_size);
        if actual != expected {
            return Err(CloudRaidError::GeometryMismatch { expected, actual });
        }
    }
    Ok(())
}

/// Whether `part` is the parity shard.
pub fn is_parity(part: usize) -> bool {
    part == PARITY_PART
}

/// Map an absolute file offset to `(data shard, offset within that shard)`.
pub fn file_to_shard(pos: u64) -> (usize, u64) {
    let line = pos / RAID_LINE;
    let in_line = pos % RAID_LINE;
    let slot = in_line / RAID_SECTOR;
    (
        slot as usize + 1,
        line * RAID_SECTOR + in_line % RAID_SECTOR,
    )
}

/// Map a data shard offset back to its absolute file offset.
///
/// Returns `None` for the parity shard, whose bytes have no file position.
pub fn shard_to_file(part: usize, shard_offset: u64) -> Option<u64> {
    if is_parity(part) || part >= RAID_PARTS {
        return None;
    }
    let line = shard_offset / RAID_SECTOR;
    let in_sector = shard_offset % RAID_SECTOR;
    Some(line * RAID_LINE + (part as u64 - 1) * RAID_SECTOR + in_sector)
}

/// Start of the stripe line containing `pos`.
pub fn line_floor(pos: u64) -> u64 {
    pos - pos % RAID_LINE
}

/// `pos` rounded up to the next stripe line boundary.
pub fn line_ceil(pos: u64) -> u64 {
    pos.div_ceil(RAID_LINE) * RAID_LINE
}

/// Number of stripe lines needed to cover `len` file bytes.
pub fn line_count(len: u64) -> u64 {
    len.div_ceil(RAID_LINE)
}

/// Split `data` into the six shards a striping server would produce.
///
/// Data shards are extracted in parallel; parity is the XOR of the data
/// shards with short sectors zero-padded.
pub fn stripe(data: &[u8]) -> Vec<Vec<u8>> {
    let file_size = data.len() as u64;

    let data_parts: Vec<Vec<u8>> = (1..RAID_PARTS)
        .into_par_iter()
        .map(|part| extract_part(data, part))
        .collect();

    let mut parity = vec![0u8; shard_size(PARITY_PART, file_size) as usize];
    for part in &data_parts {
        for (p, b) in parity.iter_mut().zip(part) {
            *p ^= b;
        }
    }

    let mut parts = Vec::with_capacity(RAID_PARTS);
    parts.push(parity);
    parts.extend(data_parts);
    parts
}

fn extract_part(data: &[u8], part: usize) -> Vec<u8> {
    let sector = RAID_SECTOR as usize;
    let line = RAID_LINE as usize;
    let mut out = Vec::with_capacity(shard_size(part, data.len() as u64) as usize);

    let mut start = (part - 1) * sector;
    while start < data.len() {
        let end = (start + sector).min(data.len());
        out.extend_from_slice(&data[start..end]);
        start += line;
    }
    out
}
