//! Stripe line assembly
//!
//! Turns aligned runs of shard data back into file order: for every line,
//! the sectors of data shards 1..=5 are laid end to end. A data shard that
//! is missing has each of its sectors rebuilt as the XOR of the parity
//! sector and the four other data sectors of the same line.

use crate::error::{CloudRaidError, Result};
use crate::{RAID_LINE, RAID_PARTS, RAID_SECTOR};
use rayon::prelude::*;

const SECTOR: usize = RAID_SECTOR as usize;
const LINE: usize = RAID_LINE as usize;

/// Batches of at least this many lines are assembled on the rayon pool.
pub const PARALLEL_LINES: usize = 4096;

/// Assemble `lines` stripe lines of file data.
///
/// `inputs[p]` holds at least `lines` sectors of shard `p` starting at the
/// same line, zero-filled where the shard is shorter, or `None` for the one
/// shard that is excluded.
pub fn combine_lines(inputs: &[Option<Vec<u8>>; RAID_PARTS], lines: usize) -> Result<Vec<u8>> {
    let missing: Vec<usize> = (0..RAID_PARTS).filter(|&p| inputs[p].is_none()).collect();
    if missing.len() > 1 {
        return Err(CloudRaidError::SequenceViolation(format!(
            "shards {:?} missing, parity covers only one",
            missing
        )));
    }

    let needed = lines * SECTOR;
    if let Some(short) = inputs.iter().flatten().find(|input| input.len() < needed) {
        return Err(CloudRaidError::GeometryMismatch {
            expected: needed as u64,
            actual: short.len() as u64,
        });
    }

    let mut out = vec![0u8; lines * LINE];
    let fill = |(line, dest): (usize, &mut [u8])| fill_line(inputs, line, dest);
    if lines >= PARALLEL_LINES {
        out.par_chunks_mut(LINE).enumerate().for_each(fill);
    } else {
        out.chunks_mut(LINE).enumerate().for_each(fill);
    }
    Ok(out)
}

fn fill_line(inputs: &[Option<Vec<u8>>; RAID_PARTS], line: usize, dest: &mut [u8]) {
    let offset = line * SECTOR;
    for part in 1..RAID_PARTS {
        let sector = &mut dest[(part - 1) * SECTOR..part * SECTOR];
        match &inputs[part] {
            Some(data) => sector.copy_from_slice(&data[offset..offset + SECTOR]),
            None => recover_sector(sector, inputs, offset, part),
        }
    }
}

/// Rebuild the sector of `missing` at shard offset `offset` from parity.
pub fn recover_sector(
    dest: &mut [u8],
    inputs: &[Option<Vec<u8>>; RAID_PARTS],
    offset: usize,
    missing: usize,
) {
    dest.fill(0);
    for (part, input) in inputs.iter().enumerate() {
        if part == missing {
            continue;
        }
        if let Some(data) = input {
            xor_into(dest, &data[offset..offset + dest.len()]);
        }
    }
}

/// `dest ^= src`, bytewise.
pub fn xor_into(dest: &mut [u8], src: &[u8]) {
    for (d, s) in dest.iter_mut().zip(src) {
        *d ^= s;
    }
}
