//! Buffer manager for shard downloads
//!
//! [`RaidBufferManager`] owns every byte between the transport and the
//! output writer for one transfer. Connections submit what they receive,
//! ask what to request next, and pick up finished output pieces. Striped
//! files are fetched as six shards and recombined line by line; plain files
//! flow straight through with the same calls.
//!
//! The manager is synchronous and not internally locked. Wrap it with
//! [`RaidBufferManager::into_shared`] when connections run on separate tasks.

use crate::backpressure::Backpressure;
use crate::combine::combine_lines;
use crate::config::RaidConfig;
use crate::error::{CloudRaidError, Result};
use crate::finalize::{DirectReadBacked, Finalizer, TransferBacked, TransferState};
use crate::geometry::{line_ceil, line_count, line_floor, shard_size};
use crate::piece::Piece;
use crate::recovery::{Decision, FailureOutcome, FailureTracker};
use crate::shard_input::{Accepted, ShardInput};
use crate::tracker::{shard_range, single_range, NextRange, PositionTracker};
use crate::{RAID_LINE, RAID_PARTS, RAID_SECTOR};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A manager shared between per-connection tasks.
pub type SharedRaidBufferManager = Arc<Mutex<RaidBufferManager>>;

/// Outcome of one combination step.
enum Step {
    /// An output piece was produced
    Emitted(Piece),
    /// Lines were combined but their bytes stay in the leftover for now
    Buffered,
    /// Not enough data across the shards
    Idle,
}

pub struct RaidBufferManager {
    finalizer: Box<dyn Finalizer>,
    config: RaidConfig,
    temp_urls: Vec<String>,
    tracker: PositionTracker,

    full_file_size: u64,
    resume_pos: u64,
    deliver_limit: u64,
    acquire_limit: u64,
    max_request_size: u64,

    // striped state
    lines_per_chunk: u64,
    backpressure: Backpressure,
    inputs: [ShardInput; RAID_PARTS],
    part_ends: [u64; RAID_PARTS],
    paused: [bool; RAID_PARTS],
    rewound: [bool; RAID_PARTS],
    leftover: Piece,
    raid_parts_pos: u64,
    resume_wasted: u64,
    failures: FailureTracker,

    // plain state
    in_flight: [Option<Range<u64>>; RAID_PARTS],
    reissue: [Option<Range<u64>>; RAID_PARTS],
    received: BTreeMap<u64, u64>,

    slots: [Option<Piece>; RAID_PARTS],
    output_file_pos: u64,
    emitted: u64,
}

impl RaidBufferManager {
    /// Create an unconfigured manager around `finalizer`.
    pub fn new(finalizer: Box<dyn Finalizer>, config: RaidConfig) -> Result<Self> {
        config.validate()?;
        let backpressure = Backpressure::new(&config, RAID_SECTOR);
        let failures = FailureTracker::new(config.retry_budget);
        Ok(Self {
            finalizer,
            config,
            temp_urls: Vec::new(),
            tracker: PositionTracker::Unknown,
            full_file_size: 0,
            resume_pos: 0,
            deliver_limit: 0,
            acquire_limit: 0,
            max_request_size: 0,
            lines_per_chunk: 1,
            backpressure,
            inputs: Default::default(),
            part_ends: [0; RAID_PARTS],
            paused: [false; RAID_PARTS],
            rewound: [false; RAID_PARTS],
            leftover: Piece::empty(0),
            raid_parts_pos: 0,
            resume_wasted: 0,
            failures,
            in_flight: Default::default(),
            reissue: Default::default(),
            received: BTreeMap::new(),
            slots: Default::default(),
            output_file_pos: 0,
            emitted: 0,
        })
    }

    /// Manager for a resumable transfer recorded in `state`.
    pub fn for_transfer(
        state: Arc<TransferState>,
        file_size: u64,
        config: RaidConfig,
    ) -> Result<Self> {
        Self::new(Box::new(TransferBacked::new(state, file_size)), config)
    }

    /// Manager for an ephemeral streaming read.
    pub fn for_direct_read(config: RaidConfig) -> Result<Self> {
        Self::new(Box::new(DirectReadBacked::new()), config)
    }

    pub fn into_shared(self) -> SharedRaidBufferManager {
        Arc::new(Mutex::new(self))
    }

    /// Set up a transfer of `[resume_pos, read_to_pos)` of a file of
    /// `file_size` bytes. One URL means a plain file, six a striped one.
    ///
    /// Any previous transfer state is discarded.
    #[instrument(skip(self, urls), fields(urls = urls.len()))]
    pub fn configure(
        &mut self,
        urls: Vec<String>,
        resume_pos: u64,
        read_to_pos: u64,
        file_size: u64,
        max_request_size: u64,
    ) -> Result<()> {
        if urls.len() != 1 && urls.len() != RAID_PARTS {
            return Err(CloudRaidError::InvalidUrlCount(urls.len()));
        }
        if resume_pos > read_to_pos || read_to_pos > file_size {
            return Err(CloudRaidError::InvalidRange {
                resume_pos,
                read_to_pos,
                file_size,
            });
        }

        self.reset();
        self.full_file_size = file_size;
        self.resume_pos = resume_pos;
        self.deliver_limit = read_to_pos;
        self.max_request_size = max_request_size.max(1);
        self.output_file_pos = resume_pos;
        self.leftover = Piece::empty(resume_pos);

        if urls.len() == RAID_PARTS {
            self.acquire_limit = line_ceil(read_to_pos).min(file_size);
            let line_start = line_floor(resume_pos);
            self.raid_parts_pos = (line_start / RAID_LINE) * RAID_SECTOR;
            self.resume_wasted = resume_pos - line_start;
            self.lines_per_chunk = self.config.resolve_lines_per_chunk(max_request_size);
            self.backpressure =
                Backpressure::new(&self.config, self.lines_per_chunk * RAID_SECTOR);

            let last = line_count(self.acquire_limit) * RAID_SECTOR;
            for part in 0..RAID_PARTS {
                self.part_ends[part] = shard_size(part, file_size).min(last);
            }
            self.tracker = PositionTracker::raid(self.raid_parts_pos);

            info!(
                resume_pos,
                read_to_pos,
                file_size,
                lines_per_chunk = self.lines_per_chunk,
                wasted = self.resume_wasted,
                "Configured striped transfer"
            );
        } else {
            self.acquire_limit = read_to_pos;
            self.tracker = PositionTracker::single(self.finalizer.shared_cursor(), resume_pos);
            info!(resume_pos, read_to_pos, file_size, "Configured plain transfer");
        }

        self.temp_urls = urls;
        Ok(())
    }

    /// Replace expired URLs, keeping every byte received so far.
    ///
    /// Requests that were in flight on the old URLs are issued again from
    /// the end of the data each connection has contiguously received.
    #[instrument(skip(self, urls), fields(urls = urls.len()))]
    pub fn update_urls_and_reset_pos(&mut self, urls: Vec<String>) -> Result<()> {
        self.ensure_configured()?;
        if urls.len() != self.temp_urls.len() {
            return Err(CloudRaidError::InvalidUrlCount(urls.len()));
        }
        self.temp_urls = urls;

        if self.is_raid() {
            let base = self.raid_parts_pos;
            for part in 0..RAID_PARTS {
                if Some(part) == self.failures.excluded() {
                    continue;
                }
                let received = self.inputs[part].contiguous_end(base);
                if self.tracker.pos(part) > received {
                    debug!(shard = part, pos = received, "Rewinding shard cursor");
                    self.tracker.set_pos(part, received);
                    self.rewound[part] = true;
                }
            }
        } else {
            for connection in 0..RAID_PARTS {
                if let Some(range) = self.in_flight[connection].take() {
                    self.reissue[connection] = Some(range);
                }
            }
        }
        info!("Transfer URLs refreshed");
        Ok(())
    }

    /// Hand data received on `connection` to the manager.
    pub fn submit(&mut self, connection: usize, piece: Piece) -> Result<()> {
        self.ensure_configured()?;
        self.check_connection(connection)?;
        if self.is_raid() {
            self.submit_striped(connection, piece)
        } else {
            self.submit_plain(connection, piece)
        }
    }

    fn submit_striped(&mut self, connection: usize, mut piece: Piece) -> Result<()> {
        let base = self.raid_parts_pos;
        let limit = self.part_ends[connection];

        if Some(connection) == self.failures.excluded() {
            if piece.end() > limit {
                piece.truncate(limit.saturating_sub(piece.pos) as usize);
            }
            if !self.inputs[connection].retain(base, piece) {
                debug!(shard = connection, "Dropped stale data from excluded shard");
            }
            return Ok(());
        }

        let (pos, len) = (piece.pos, piece.len());
        match self.inputs[connection].accept(base, piece, limit) {
            Accepted::Behind if self.rewound[connection] => {
                warn!(shard = connection, pos, len, "Discarded stale data behind combine point");
            }
            Accepted::Behind => {
                return Err(CloudRaidError::SequenceViolation(format!(
                    "shard {} data at {}..{} is behind combine point {}",
                    connection,
                    pos,
                    pos + len as u64,
                    base
                )));
            }
            Accepted::Duplicate => {
                warn!(shard = connection, pos, len, "Dropped duplicate shard data");
            }
            Accepted::Queued | Accepted::Held => {}
        }

        self.failures.record_success(connection);
        self.combine_into(connection)?;
        Ok(())
    }

    fn submit_plain(&mut self, connection: usize, mut piece: Piece) -> Result<()> {
        if self.slots[connection].is_some() {
            return Err(CloudRaidError::SequenceViolation(format!(
                "connection {} submitted before releasing its output",
                connection
            )));
        }

        if piece.end() > self.deliver_limit {
            piece.truncate(self.deliver_limit.saturating_sub(piece.pos) as usize);
        }
        if piece.pos < self.output_file_pos {
            piece.advance((self.output_file_pos - piece.pos) as usize);
        }
        self.note_received(connection, piece.pos..piece.end());
        self.failures.record_success(connection);

        self.skip_received(&mut piece);
        if let Some((start, end)) = self.next_received(&piece) {
            // keep the head only; what lies past the received run is fetched again
            let tail = piece.split_off((start - piece.pos) as usize);
            if tail.end() > end {
                self.queue_reissue(connection, end..tail.end());
            }
        }

        if piece.is_empty() {
            debug!(connection, pos = piece.pos, "Dropped already received data");
            return Ok(());
        }

        self.record_range(piece.pos, piece.end());
        self.finalizer.finalize(&mut piece)?;
        self.emitted += piece.len() as u64;
        self.slots[connection] = Some(piece);
        Ok(())
    }

    /// The output piece waiting on `connection`, if any.
    ///
    /// Striped transfers combine buffered data on demand, so output never
    /// waits for another submission.
    pub fn get_output_buffer(&mut self, connection: usize) -> Result<Option<&Piece>> {
        self.ensure_configured()?;
        self.check_connection(connection)?;
        if self.is_raid() {
            self.combine_into(connection)?;
        }
        Ok(self.slots[connection].as_ref())
    }

    /// Release the output piece of `connection` once it has been written.
    pub fn acknowledge_release(&mut self, connection: usize) -> Result<()> {
        self.check_connection(connection)?;
        let piece = self.slots[connection].take().ok_or_else(|| {
            CloudRaidError::SequenceViolation(format!(
                "connection {} released output it does not hold",
                connection
            ))
        })?;
        self.finalizer.on_release(&piece);
        debug!(connection, pos = piece.pos, len = piece.len(), "Released output");
        Ok(())
    }

    /// The next range `connection` should request.
    ///
    /// Striped ranges are in shard-local bytes, plain ranges in file bytes.
    /// An empty range means nothing to request right now.
    pub fn next_range(&mut self, connection: usize) -> Result<NextRange> {
        self.ensure_configured()?;
        self.check_connection(connection)?;
        if self.is_raid() {
            self.next_striped_range(connection)
        } else {
            Ok(self.next_plain_range(connection))
        }
    }

    fn next_striped_range(&mut self, connection: usize) -> Result<NextRange> {
        let end = self.part_ends[connection];
        let excluded = Some(connection) == self.failures.excluded();
        if !excluded {
            // a rewound cursor skips whatever has since arrived contiguously
            let received = self.inputs[connection].contiguous_end(self.raid_parts_pos);
            if received > self.tracker.pos(connection) {
                debug!(shard = connection, pos = received, "Advancing shard cursor");
                self.tracker.set_pos(connection, received);
            }
        }
        let pos = self.tracker.pos(connection);

        if excluded || pos >= end {
            let supplied = self.combine_into(connection)?;
            return Ok(NextRange {
                supplied_from_buffer: supplied,
                ..NextRange::idle(pos)
            });
        }

        // only data the combine point can reach counts; bytes waiting
        // behind a gap must not stop the shard from filling that gap
        let queued = self.inputs[connection].queued_len();
        let paused = self.backpressure.evaluate(queued, self.paused[connection]);
        if paused != self.paused[connection] {
            debug!(shard = connection, queued, paused, "Shard read-ahead state changed");
        }
        self.paused[connection] = paused;

        if paused {
            let supplied = self.combine_into(connection)?;
            return Ok(NextRange {
                supplied_from_buffer: supplied,
                should_pause: true,
                ..NextRange::idle(pos)
            });
        }

        let range = shard_range(pos, end, self.lines_per_chunk * RAID_SECTOR);
        self.tracker.set_pos(connection, range.end);
        Ok(range)
    }

    fn next_plain_range(&mut self, connection: usize) -> NextRange {
        if let Some(range) = self.reissue[connection].take() {
            self.in_flight[connection] = Some(range.clone());
            return NextRange::request(range.start, range.end);
        }

        let finalizer = &self.finalizer;
        let range = single_range(
            self.tracker.pos(connection),
            self.max_request_size,
            self.deliver_limit,
            |end| finalizer.output_chunk_pos(end),
        );
        if !range.is_empty() {
            self.tracker.set_pos(connection, range.end);
            self.in_flight[connection] = Some(range.start..range.end);
        }
        range
    }

    /// A request on `connection` failed.
    #[instrument(skip(self))]
    pub fn report_failure(&mut self, connection: usize) -> Result<FailureOutcome> {
        self.ensure_configured()?;
        self.check_connection(connection)?;

        match self.failures.record_failure(connection, self.is_raid())? {
            Decision::Retry => {
                if let Some(range) = self.in_flight[connection].take() {
                    self.reissue[connection] = Some(range);
                }
                Ok(FailureOutcome::Retry)
            }
            Decision::Demote(shard) => {
                self.demote(shard, false);
                Ok(FailureOutcome::Demoted { excluded: shard })
            }
            Decision::Swap { demote, restore } => {
                self.restore_shard(restore);
                self.demote(demote, false);
                Ok(FailureOutcome::Swapped {
                    excluded: demote,
                    restored: restore,
                })
            }
        }
    }

    /// A request on `connection` succeeded.
    pub fn report_success(&mut self, connection: usize) -> Result<()> {
        self.check_connection(connection)?;
        self.failures.record_success(connection);
        Ok(())
    }

    /// Stop fetching shard `slow` and rebuild it from parity instead.
    ///
    /// Returns false when a shard is already excluded.
    pub fn use_five_connections(&mut self, slow: usize) -> Result<bool> {
        self.ensure_raid()?;
        self.check_connection(slow)?;
        if self.failures.excluded().is_some() {
            return Ok(false);
        }
        self.demote(slow, true);
        Ok(true)
    }

    /// Go back to fetching all six shards. Returns the shard brought back.
    pub fn restore_excluded(&mut self) -> Result<Option<usize>> {
        self.ensure_raid()?;
        let Some(shard) = self.failures.excluded() else {
            return Ok(None);
        };
        self.restore_shard(shard);
        Ok(Some(shard))
    }

    /// Whether every shard other than `slow` is paused (or excluded).
    pub fn connections_all_paused_except(&self, slow: usize) -> bool {
        self.is_raid()
            && (0..RAID_PARTS)
                .filter(|&part| part != slow)
                .all(|part| self.paused[part] || Some(part) == self.failures.excluded())
    }

    fn demote(&mut self, shard: usize, voluntary: bool) {
        if self.failures.excluded() == Some(shard) {
            return;
        }
        self.inputs[shard].retain_all();
        self.paused[shard] = false;
        self.failures.exclude(shard, voluntary);
        info!(shard, voluntary, "Switched to five connections");
    }

    fn restore_shard(&mut self, shard: usize) {
        let base = self.raid_parts_pos;
        self.inputs[shard].restore(base);
        let resume = self.inputs[shard].contiguous_end(base);
        self.tracker.set_pos(shard, resume);
        self.rewound[shard] = true;
        self.failures.clear_exclusion();
        info!(shard, pos = resume, "Switched back to six connections");
    }

    fn combine_into(&mut self, connection: usize) -> Result<bool> {
        if self.slots[connection].is_some() {
            return Ok(false);
        }
        loop {
            match self.combine_step()? {
                Step::Emitted(piece) => {
                    self.slots[connection] = Some(piece);
                    return Ok(true);
                }
                Step::Buffered => continue,
                Step::Idle => return Ok(false),
            }
        }
    }

    fn combine_step(&mut self) -> Result<Step> {
        let excluded = self.failures.excluded();
        let base = self.raid_parts_pos;

        let mut all_complete = true;
        let mut ready = u64::MAX;
        let mut max_end = base;
        for part in (0..RAID_PARTS).filter(|&p| Some(p) != excluded) {
            let end = self.part_ends[part];
            let queued = self.inputs[part].queued_len();
            max_end = max_end.max(end);
            if base + queued < end {
                all_complete = false;
                ready = ready.min(queued);
            }
        }

        let parts_len = if all_complete {
            max_end - base
        } else {
            ready - ready % RAID_SECTOR
        };
        let batch = self.config.max_chunks_per_combine * self.lines_per_chunk * RAID_SECTOR;
        let parts_len = parts_len.min(batch);
        if parts_len == 0 {
            return Ok(Step::Idle);
        }

        let lines = parts_len.div_ceil(RAID_SECTOR);
        let gathered: [Option<Vec<u8>>; RAID_PARTS] = std::array::from_fn(|part| {
            (Some(part) != excluded)
                .then(|| self.inputs[part].gather((lines * RAID_SECTOR) as usize))
        });
        let combined = combine_lines(&gathered, lines as usize)?;

        for part in 0..RAID_PARTS {
            if Some(part) == excluded {
                self.inputs[part].prune_behind(base + parts_len);
            } else {
                self.inputs[part].consume(parts_len);
            }
        }
        self.raid_parts_pos += parts_len;

        let file_start = (base / RAID_SECTOR) * RAID_LINE;
        let file_end = (file_start + lines * RAID_LINE).min(self.acquire_limit);
        let mut fresh =
            Piece::from_bytes(file_start, &combined[..(file_end - file_start) as usize]);

        let stream_end = self.leftover.end();
        if fresh.pos < stream_end {
            fresh.advance((stream_end - fresh.pos) as usize);
        }
        if fresh.end() > self.deliver_limit {
            fresh.truncate(self.deliver_limit.saturating_sub(fresh.pos) as usize);
        }
        if !fresh.is_empty() {
            self.leftover.absorb(fresh);
        }

        debug!(base, parts_len, lines, excluded = ?excluded, "Combined stripe lines");
        self.emit()
    }

    fn emit(&mut self) -> Result<Step> {
        let stream_end = self.leftover.end();
        let emit_end = if stream_end >= self.deliver_limit {
            stream_end
        } else {
            self.finalizer
                .output_chunk_pos(stream_end)
                .max(self.output_file_pos)
        };
        if emit_end <= self.output_file_pos {
            return Ok(Step::Buffered);
        }

        let mut out = std::mem::replace(&mut self.leftover, Piece::empty(emit_end));
        let rest = out.split_off((emit_end - out.pos) as usize);
        self.leftover = rest;

        self.finalizer.finalize(&mut out)?;
        self.output_file_pos = emit_end;
        self.emitted += out.len() as u64;
        Ok(Step::Emitted(out))
    }

    /// Advance the outstanding and reissued ranges of `connection` past
    /// bytes that have now arrived.
    fn note_received(&mut self, connection: usize, got: Range<u64>) {
        for slot in [&mut self.in_flight[connection], &mut self.reissue[connection]] {
            let done = match slot {
                Some(range) => {
                    if got.start <= range.start && got.end > range.start {
                        range.start = got.end;
                    }
                    range.start >= range.end
                }
                None => false,
            };
            if done {
                *slot = None;
            }
        }
    }

    /// Drop the head of `piece` wherever earlier pieces already cover it.
    fn skip_received(&self, piece: &mut Piece) {
        while !piece.is_empty() {
            let covered = self
                .received
                .range(..=piece.pos)
                .next_back()
                .map(|(_, &end)| end)
                .filter(|&end| end > piece.pos);
            match covered {
                Some(end) if end >= piece.end() => piece.truncate(0),
                Some(end) => piece.advance((end - piece.pos) as usize),
                None => break,
            }
        }
    }

    /// First received run starting inside `piece`.
    fn next_received(&self, piece: &Piece) -> Option<(u64, u64)> {
        if piece.len() < 2 {
            return None;
        }
        self.received
            .range(piece.pos + 1..piece.end())
            .next()
            .map(|(&start, &end)| (start, end))
    }

    fn queue_reissue(&mut self, connection: usize, range: Range<u64>) {
        let merged = match self.reissue[connection].take() {
            Some(existing) => existing.start.min(range.start)..existing.end.max(range.end),
            None => range,
        };
        debug!(connection, start = merged.start, end = merged.end, "Queued reissue");
        self.reissue[connection] = Some(merged);
    }

    fn record_range(&mut self, start: u64, end: u64) {
        let entry = self.received.entry(start).or_insert(end);
        *entry = (*entry).max(end);
        while let Some((&start, &end)) = self.received.first_key_value() {
            if start > self.output_file_pos {
                break;
            }
            self.received.remove(&start);
            self.output_file_pos = self.output_file_pos.max(end);
        }
    }

    fn reset(&mut self) {
        self.temp_urls.clear();
        self.tracker = PositionTracker::Unknown;
        self.inputs = Default::default();
        self.part_ends = [0; RAID_PARTS];
        self.paused = [false; RAID_PARTS];
        self.rewound = [false; RAID_PARTS];
        self.raid_parts_pos = 0;
        self.resume_wasted = 0;
        self.lines_per_chunk = 1;
        self.failures = FailureTracker::new(self.config.retry_budget);
        self.in_flight = Default::default();
        self.reissue = Default::default();
        self.received.clear();
        self.slots = Default::default();
        self.emitted = 0;
    }

    fn ensure_configured(&self) -> Result<()> {
        match self.tracker {
            PositionTracker::Unknown => Err(CloudRaidError::NotConfigured),
            _ => Ok(()),
        }
    }

    fn ensure_raid(&self) -> Result<()> {
        self.ensure_configured()?;
        if !self.is_raid() {
            return Err(CloudRaidError::SequenceViolation(
                "shard exclusion requested on a plain transfer".to_string(),
            ));
        }
        Ok(())
    }

    fn check_connection(&self, connection: usize) -> Result<()> {
        if connection >= RAID_PARTS {
            return Err(CloudRaidError::InvalidConnection {
                index: connection,
                max: RAID_PARTS - 1,
            });
        }
        Ok(())
    }

    // ===== Queries =====

    pub fn is_raid(&self) -> bool {
        matches!(self.tracker, PositionTracker::Raid { .. })
    }

    pub fn is_configured(&self) -> bool {
        !matches!(self.tracker, PositionTracker::Unknown)
    }

    /// Whether everything up to the read limit has been output and released.
    pub fn is_complete(&self) -> bool {
        self.is_configured()
            && self.output_file_pos >= self.deliver_limit
            && self.leftover.is_empty()
            && self.slots.iter().all(Option::is_none)
    }

    /// URL serving `connection`; plain transfers use one URL for all.
    pub fn temp_url(&self, connection: usize) -> Option<&str> {
        if self.is_raid() {
            self.temp_urls.get(connection).map(String::as_str)
        } else {
            self.temp_urls.first().map(String::as_str)
        }
    }

    pub fn temp_urls(&self) -> &[String] {
        &self.temp_urls
    }

    /// Request cursor of `connection`.
    pub fn transfer_pos(&self, connection: usize) -> u64 {
        self.tracker.pos(connection)
    }

    /// End of what `connection` fetches: its shard's end when striped,
    /// otherwise the read limit.
    pub fn transfer_size(&self, connection: usize) -> u64 {
        if self.is_raid() {
            self.part_ends.get(connection).copied().unwrap_or(0)
        } else {
            self.deliver_limit
        }
    }

    pub fn full_file_size(&self) -> u64 {
        self.full_file_size
    }

    pub fn resume_pos(&self) -> u64 {
        self.resume_pos
    }

    pub fn deliver_limit(&self) -> u64 {
        self.deliver_limit
    }

    pub fn acquire_limit(&self) -> u64 {
        self.acquire_limit
    }

    /// File bytes output so far, counted from the resume position.
    pub fn output_file_pos(&self) -> u64 {
        self.output_file_pos
    }

    /// Shard offset up to which every shard has been combined.
    pub fn raid_parts_pos(&self) -> u64 {
        self.raid_parts_pos
    }

    /// Bytes read from the shards but skipped because the transfer resumed
    /// inside a stripe line.
    pub fn resume_wasted_bytes(&self) -> u64 {
        self.resume_wasted
    }

    /// Total bytes handed out as output pieces.
    pub fn emitted_bytes(&self) -> u64 {
        self.emitted
    }

    pub fn lines_per_chunk(&self) -> u64 {
        self.lines_per_chunk
    }

    pub fn excluded_shard(&self) -> Option<usize> {
        self.failures.excluded()
    }

    pub fn is_paused(&self, connection: usize) -> bool {
        self.paused.get(connection).copied().unwrap_or(false)
    }

    pub fn failure_count(&self, connection: usize) -> u32 {
        self.failures.errors(connection)
    }

    /// Bytes buffered beyond the combine point for `connection`.
    pub fn held_bytes(&self, connection: usize) -> u64 {
        self.inputs
            .get(connection)
            .map(ShardInput::held_len)
            .unwrap_or(0)
    }

    pub fn config(&self) -> &RaidConfig {
        &self.config
    }
}

impl std::fmt::Debug for RaidBufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaidBufferManager")
            .field("is_raid", &self.is_raid())
            .field("deliver_limit", &self.deliver_limit)
            .field("acquire_limit", &self.acquire_limit)
            .field("raid_parts_pos", &self.raid_parts_pos)
            .field("output_file_pos", &self.output_file_pos)
            .field("excluded", &self.failures.excluded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::stripe;

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://shard{}.example/file", i)).collect()
    }

    fn patterned(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i * 7 + i / 251) as u8).collect()
    }

    fn drain(manager: &mut RaidBufferManager, out: &mut Vec<(u64, Vec<u8>)>) {
        loop {
            let mut progressed = false;
            for c in 0..RAID_PARTS {
                let ready = manager
                    .get_output_buffer(c)
                    .unwrap()
                    .map(|piece| (piece.pos, piece.data().to_vec()));
                if let Some(output) = ready {
                    out.push(output);
                    manager.acknowledge_release(c).unwrap();
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn assemble(mut pieces: Vec<(u64, Vec<u8>)>, start: u64) -> Vec<u8> {
        pieces.sort_by_key(|(pos, _)| *pos);
        let mut data = Vec::new();
        for (pos, bytes) in pieces {
            assert_eq!(pos, start + data.len() as u64, "output has a gap");
            data.extend(bytes);
        }
        data
    }

    #[test]
    fn test_configure_validates() {
        let mut manager = RaidBufferManager::for_direct_read(RaidConfig::per_line()).unwrap();
        assert!(matches!(
            manager.configure(urls(3), 0, 10, 10, 1024),
            Err(CloudRaidError::InvalidUrlCount(3))
        ));
        assert!(matches!(
            manager.configure(urls(6), 20, 10, 100, 1024),
            Err(CloudRaidError::InvalidRange { .. })
        ));
        assert!(matches!(
            manager.submit(0, Piece::from_bytes(0, b"x")),
            Err(CloudRaidError::NotConfigured)
        ));
    }

    #[test]
    fn test_configure_striped_resume() {
        let mut manager = RaidBufferManager::for_direct_read(RaidConfig::per_line()).unwrap();
        manager.configure(urls(6), 1234, 1500, 2000, 4096).unwrap();

        assert!(manager.is_raid());
        // line 15 starts at 1200
        assert_eq!(manager.raid_parts_pos(), 15 * 16);
        assert_eq!(manager.resume_wasted_bytes(), 34);
        assert_eq!(manager.acquire_limit(), 1520);
        assert_eq!(manager.transfer_pos(2), 240);
        assert_eq!(manager.transfer_size(1), 19 * 16);
        assert_eq!(manager.temp_url(4), Some("https://shard4.example/file"));
    }

    #[test]
    fn test_small_file_whole_shards() {
        let data = patterned(1000);
        let parts = stripe(&data);
        let mut manager = RaidBufferManager::for_direct_read(RaidConfig::per_line()).unwrap();
        manager.configure(urls(6), 0, 1000, 1000, 4096).unwrap();

        let mut out = Vec::new();
        for (c, part) in parts.iter().enumerate() {
            manager.submit(c, Piece::from_bytes(0, part)).unwrap();
            drain(&mut manager, &mut out);
        }
        drain(&mut manager, &mut out);

        assert_eq!(assemble(out, 0), data);
        assert_eq!(manager.emitted_bytes(), 1000);
        assert!(manager.is_complete());
    }

    #[test]
    fn test_release_without_output_is_violation() {
        let mut manager = RaidBufferManager::for_direct_read(RaidConfig::default()).unwrap();
        manager.configure(urls(1), 0, 100, 100, 4096).unwrap();
        assert!(matches!(
            manager.acknowledge_release(0),
            Err(CloudRaidError::SequenceViolation(_))
        ));
        assert!(matches!(
            manager.get_output_buffer(6),
            Err(CloudRaidError::InvalidConnection { index: 6, max: 5 })
        ));
    }

    #[test]
    fn test_plain_slot_must_be_released() {
        let mut manager = RaidBufferManager::for_direct_read(RaidConfig::default()).unwrap();
        manager.configure(urls(1), 0, 100, 100, 64).unwrap();

        let range = manager.next_range(0).unwrap();
        assert_eq!((range.start, range.end), (0, 64));

        manager.submit(0, Piece::from_bytes(0, [1u8; 64])).unwrap();
        assert!(matches!(
            manager.submit(0, Piece::from_bytes(64, [1u8; 36])),
            Err(CloudRaidError::SequenceViolation(_))
        ));

        manager.acknowledge_release(0).unwrap();
        manager.submit(0, Piece::from_bytes(64, [1u8; 36])).unwrap();
        manager.acknowledge_release(0).unwrap();
        assert!(manager.is_complete());
    }

    #[test]
    fn test_plain_retry_reissues_range() {
        let mut manager = RaidBufferManager::for_direct_read(RaidConfig::default()).unwrap();
        manager.configure(urls(1), 0, 1000, 1000, 256).unwrap();

        let first = manager.next_range(0).unwrap();
        assert_eq!(manager.report_failure(0).unwrap(), FailureOutcome::Retry);
        let again = manager.next_range(0).unwrap();
        assert_eq!((again.start, again.end), (first.start, first.end));

        // the shared cursor was not rewound
        let next = manager.next_range(1).unwrap();
        assert_eq!(next.start, first.end);
    }

    #[test]
    fn test_plain_late_response_after_refresh_not_emitted_twice() {
        let data = patterned(4096);
        let mut manager = RaidBufferManager::for_direct_read(RaidConfig::default()).unwrap();
        manager.configure(urls(1), 0, 4096, 4096, 1024).unwrap();

        manager.next_range(0).unwrap();
        let second = manager.next_range(1).unwrap();
        assert_eq!((second.start, second.end), (1024, 2048));
        manager.update_urls_and_reset_pos(urls(1)).unwrap();

        // responses on the expired URLs still arrive: all of the first, part of the second
        manager.submit(0, Piece::from_bytes(0, &data[..1024])).unwrap();
        manager.submit(1, Piece::from_bytes(1024, &data[1024..1500])).unwrap();
        let mut out = Vec::new();
        drain(&mut manager, &mut out);

        // only the undelivered remainder is requested again
        let again = manager.next_range(1).unwrap();
        assert_eq!((again.start, again.end), (1500, 2048));
        assert_eq!(manager.next_range(0).unwrap().start, 2048);

        // a transport that re-sends the whole original range
        manager.submit(1, Piece::from_bytes(1024, &data[1024..2048])).unwrap();
        drain(&mut manager, &mut out);
        assert_eq!(out.last().map(|(pos, bytes)| (*pos, bytes.len())), Some((1500, 548)));
        assert_eq!(manager.emitted_bytes(), 2048);
        assert_eq!(manager.output_file_pos(), 2048);
    }

    #[test]
    fn test_plain_overlap_with_later_range_is_cut() {
        let data = patterned(4096);
        let mut manager = RaidBufferManager::for_direct_read(RaidConfig::default()).unwrap();
        manager.configure(urls(1), 0, 4096, 4096, 1024).unwrap();

        manager.next_range(0).unwrap();
        manager.next_range(1).unwrap();
        manager.submit(1, Piece::from_bytes(1024, &data[1024..2048])).unwrap();
        manager.acknowledge_release(1).unwrap();

        // connection 0 gets back more than it asked for
        manager.submit(0, Piece::from_bytes(0, &data[..3000])).unwrap();
        let mut out = Vec::new();
        drain(&mut manager, &mut out);
        assert_eq!(out, vec![(0, data[..1024].to_vec())]);
        assert_eq!(manager.emitted_bytes(), 2048);

        // the part past the already delivered run is fetched again
        let again = manager.next_range(0).unwrap();
        assert_eq!((again.start, again.end), (2048, 3000));
    }

    #[test]
    fn test_use_five_connections() {
        let mut manager = RaidBufferManager::for_direct_read(RaidConfig::per_line()).unwrap();
        manager.configure(urls(6), 0, 1000, 1000, 4096).unwrap();

        assert!(!manager.connections_all_paused_except(3));
        assert!(manager.use_five_connections(3).unwrap());
        assert!(!manager.use_five_connections(2).unwrap());
        assert_eq!(manager.excluded_shard(), Some(3));

        let range = manager.next_range(3).unwrap();
        assert!(range.is_empty());
        assert!(!range.supplied_from_buffer);

        assert_eq!(manager.restore_excluded().unwrap(), Some(3));
        assert_eq!(manager.excluded_shard(), None);
    }

    #[test]
    fn test_plain_transfer_rejects_shard_exclusion() {
        let mut manager = RaidBufferManager::for_direct_read(RaidConfig::default()).unwrap();
        manager.configure(urls(1), 0, 100, 100, 64).unwrap();
        assert!(!manager.is_raid());
        assert!(manager.use_five_connections(1).is_err());
        assert!(!manager.connections_all_paused_except(1));
    }
}
