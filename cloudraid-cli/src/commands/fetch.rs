//! Fetch Command
//!
//! Reassembles a file from local shard files through the buffer manager,
//! one tokio task per connection, the way a network transport would drive
//! it.

use super::format_bytes;
use crate::symbols;
use crate::transport::{RangeReader, Source};
use anyhow::{bail, Context, Result};
use cloudraid_core::{
    FailureOutcome, Piece, RaidBufferManager, RaidConfig, SharedRaidBufferManager, TransferState,
    RAID_PARTS,
};
use console::style;
use futures::future::try_join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Fetch configuration
pub struct FetchConfig {
    pub output: PathBuf,
    pub source: Source,
    pub size: Option<u64>,
    pub resume: u64,
    pub read_to: Option<u64>,
    pub fail_shard: Option<usize>,
    pub direct: bool,
    pub max_request_size: u64,
    pub connections: usize,
    pub raid: RaidConfig,
    pub progress: bool,
}

/// What a finished fetch did
#[derive(Debug)]
pub struct FetchSummary {
    pub bytes: u64,
    pub striped: bool,
    pub excluded: Option<usize>,
    pub verified_chunks: usize,
}

/// Run fetch command
pub async fn run(config: FetchConfig) -> Result<()> {
    let output = config.output.clone();
    let summary = fetch(config).await?;

    println!(
        "\n{} {}\n  Size: {}\n  Saved to: {}",
        style("Successfully reassembled:").green().bold(),
        if summary.striped { "striped file" } else { "plain file" },
        format_bytes(summary.bytes),
        output.display()
    );
    if let Some(shard) = summary.excluded {
        println!(
            "  {} part{} rebuilt from parity",
            style(symbols::REBUILT).yellow(),
            shard
        );
    }
    if summary.verified_chunks > 0 {
        println!("  Integrity chunks: {}", summary.verified_chunks);
    }
    Ok(())
}

/// Reassemble the configured range into the output file.
pub async fn fetch(config: FetchConfig) -> Result<FetchSummary> {
    let size = config.source.file_size(config.size).await?;
    let read_to = config.read_to.unwrap_or(size);
    if let Some(shard) = config.fail_shard {
        if shard >= RAID_PARTS {
            bail!("--fail-shard must be below {}", RAID_PARTS);
        }
    }

    let state = TransferState::new();
    let mut manager = if config.direct {
        RaidBufferManager::for_direct_read(config.raid.clone())?
    } else {
        RaidBufferManager::for_transfer(state.clone(), size, config.raid.clone())?
    };
    manager
        .configure(
            config.source.urls(),
            config.resume,
            read_to,
            size,
            config.max_request_size,
        )
        .context("Failed to configure transfer")?;

    let striped = manager.is_raid();
    let connections = if striped {
        RAID_PARTS
    } else {
        config.connections.clamp(1, RAID_PARTS)
    };
    info!(size, read_to, striped, connections, "Starting fetch");

    prepare_output(&config.output, config.resume).await?;

    let progress = if config.progress {
        let pb = ProgressBar::new(read_to - config.resume);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .context("Invalid progress template")?
                .progress_chars("#>-"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let shared = manager.into_shared();
    let tasks: Vec<_> = (0..connections)
        .map(|connection| {
            let worker = Connection {
                index: connection,
                manager: shared.clone(),
                source: config.source.path_for(connection).to_path_buf(),
                output: config.output.clone(),
                progress: progress.clone(),
                inject_failure: config.fail_shard == Some(connection),
            };
            tokio::spawn(worker.run())
        })
        .collect();

    for result in try_join_all(tasks).await.context("Connection task panicked")? {
        result?;
    }
    progress.finish_and_clear();

    let manager = shared.lock();
    Ok(FetchSummary {
        bytes: manager.emitted_bytes(),
        striped,
        excluded: manager.excluded_shard(),
        verified_chunks: if config.direct {
            0
        } else {
            state.completed_chunks().len()
        },
    })
}

async fn prepare_output(path: &Path, resume: u64) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(resume == 0)
        .open(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(())
}

/// One connection's request/submit/write loop.
struct Connection {
    index: usize,
    manager: SharedRaidBufferManager,
    source: PathBuf,
    output: PathBuf,
    progress: ProgressBar,
    inject_failure: bool,
}

impl Connection {
    async fn run(mut self) -> Result<()> {
        let mut reader = RangeReader::open(&self.source).await?;
        let mut out = OpenOptions::new()
            .write(true)
            .open(&self.output)
            .await
            .with_context(|| format!("Failed to open {}", self.output.display()))?;

        loop {
            let range = {
                let mut manager = self.manager.lock();
                if manager.is_complete() {
                    break;
                }
                manager.next_range(self.index)?
            };

            if !range.is_empty() {
                if self.inject_failure {
                    self.inject_failure = false;
                    let outcome = self.manager.lock().report_failure(self.index)?;
                    warn!(connection = self.index, ?outcome, "Injected request failure");
                    if let FailureOutcome::Swapped { restored, .. } = outcome {
                        debug!(restored, "Excluded shard brought back");
                    }
                    continue;
                }

                let data = reader.read_range(range.start, range.end).await?;
                self.manager
                    .lock()
                    .submit(self.index, Piece::from_bytes(range.start, data))?;
            }

            let ready = self
                .manager
                .lock()
                .get_output_buffer(self.index)?
                .map(|piece| (piece.pos, piece.data().to_vec()));
            match ready {
                Some((pos, bytes)) => {
                    out.seek(SeekFrom::Start(pos)).await?;
                    out.write_all(&bytes).await?;
                    self.manager.lock().acknowledge_release(self.index)?;
                    self.progress.inc(bytes.len() as u64);
                }
                None if range.is_empty() => {
                    // paused, finished, or excluded: let the others catch up
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                None => {}
            }
        }

        out.flush().await?;
        debug!(connection = self.index, "Connection finished");
        Ok(())
    }
}
