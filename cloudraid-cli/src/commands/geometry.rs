//! Geometry Command
//!
//! Prints how a file of a given size is split across the six shards.

use super::format_bytes;
use anyhow::Result;
use cloudraid_core::geometry::{is_parity, line_count};
use cloudraid_core::{shard_sizes, RAID_LINE};
use console::style;
use serde::Serialize;

/// Shard split of one file size
#[derive(Debug, Serialize)]
pub struct GeometryReport {
    pub file_size: u64,
    pub lines: u64,
    pub partial_line_bytes: u64,
    pub shards: Vec<ShardInfo>,
}

#[derive(Debug, Serialize)]
pub struct ShardInfo {
    pub index: usize,
    pub role: &'static str,
    pub size: u64,
}

impl GeometryReport {
    pub fn new(file_size: u64) -> Self {
        let shards = shard_sizes(file_size)
            .iter()
            .enumerate()
            .map(|(index, &size)| ShardInfo {
                index,
                role: if is_parity(index) { "parity" } else { "data" },
                size,
            })
            .collect();
        Self {
            file_size,
            lines: line_count(file_size),
            partial_line_bytes: file_size % RAID_LINE,
            shards,
        }
    }
}

/// Run geometry command
pub fn run(file_size: u64, json: bool) -> Result<()> {
    let report = GeometryReport::new(file_size);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{}",
        style(format!("Geometry for {} ({} bytes)", format_bytes(file_size), file_size))
            .bold()
            .underlined()
    );
    println!();
    println!(
        "Stripe lines: {} ({} bytes in the last partial line)",
        report.lines, report.partial_line_bytes
    );
    println!();
    for shard in &report.shards {
        println!(
            "  part{}  {:<6}  {:>12} bytes",
            shard.index,
            style(shard.role).cyan(),
            shard.size
        );
    }

    Ok(())
}
