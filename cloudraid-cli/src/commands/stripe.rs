//! Stripe Command
//!
//! Splits a file into the six shard files a striping server would serve.

use super::format_bytes;
use crate::symbols;
use crate::transport::part_path;
use anyhow::{Context, Result};
use cloudraid_core::geometry::is_parity;
use cloudraid_core::{stripe, RAID_PARTS};
use console::style;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Stripe configuration
pub struct StripeConfig {
    pub input: PathBuf,
    pub out_dir: PathBuf,
}

/// Run stripe command
pub async fn run(config: StripeConfig) -> Result<()> {
    let data = fs::read(&config.input)
        .await
        .with_context(|| format!("Failed to read {}", config.input.display()))?;

    let sizes = write_parts(&data, &config.out_dir).await?;

    println!(
        "{} Striped {} ({}) into {}",
        style(symbols::CHECK).green(),
        config.input.display(),
        format_bytes(data.len() as u64),
        config.out_dir.display()
    );
    for (part, size) in sizes.iter().enumerate() {
        let role = if is_parity(part) { "parity" } else { "data" };
        println!("  part{}  {:<6}  {} bytes", part, role, size);
    }

    Ok(())
}

/// Write `part0`..`part5` for `data` into `dir`, returning their sizes.
pub async fn write_parts(data: &[u8], dir: &Path) -> Result<[u64; RAID_PARTS]> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let parts = stripe(data);
    let mut sizes = [0u64; RAID_PARTS];
    for (part, bytes) in parts.iter().enumerate() {
        let path = part_path(dir, part);
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(part, size = bytes.len(), "Wrote shard");
        sizes[part] = bytes.len() as u64;
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudraid_core::shard_sizes;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_parts_matches_geometry() {
        let dir = TempDir::new().unwrap();
        let data = vec![3u8; 1000];

        let sizes = write_parts(&data, &dir.path().join("shards")).await.unwrap();
        assert_eq!(sizes, shard_sizes(1000));
        assert_eq!(sizes, [208, 208, 208, 200, 192, 192]);

        let part3 = fs::read(part_path(&dir.path().join("shards"), 3)).await.unwrap();
        assert_eq!(part3.len(), 200);
    }
}
