//! Local shard files standing in for network endpoints
//!
//! A striped source is a directory holding `part0` (parity) through `part5`;
//! a plain source is one file. Each connection opens its own handle and
//! reads the ranges the buffer manager asks for.

use anyhow::{bail, Context, Result};
use cloudraid_core::geometry::verify_shard_sizes;
use cloudraid_core::RAID_PARTS;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Path of shard `part` inside `dir`.
pub fn part_path(dir: &Path, part: usize) -> PathBuf {
    dir.join(format!("part{}", part))
}

/// Where a fetch reads from.
#[derive(Debug, Clone)]
pub enum Source {
    Striped { parts: Vec<PathBuf> },
    Plain { file: PathBuf },
}

impl Source {
    pub fn striped(dir: &Path) -> Self {
        Source::Striped {
            parts: (0..RAID_PARTS).map(|part| part_path(dir, part)).collect(),
        }
    }

    pub fn plain(file: &Path) -> Self {
        Source::Plain {
            file: file.to_path_buf(),
        }
    }

    /// Endpoint strings handed to the buffer manager.
    pub fn urls(&self) -> Vec<String> {
        match self {
            Source::Striped { parts } => parts.iter().map(|p| file_url(p)).collect(),
            Source::Plain { file } => vec![file_url(file)],
        }
    }

    /// Path that `connection` reads from.
    pub fn path_for(&self, connection: usize) -> &Path {
        match self {
            Source::Striped { parts } => &parts[connection],
            Source::Plain { file } => file,
        }
    }

    /// Size of the reassembled file.
    ///
    /// Striped sources derive it from the data shards and check every shard
    /// against the split the file size implies.
    pub async fn file_size(&self, declared: Option<u64>) -> Result<u64> {
        match self {
            Source::Plain { file } => {
                let len = tokio::fs::metadata(file)
                    .await
                    .with_context(|| format!("Failed to stat {}", file.display()))?
                    .len();
                if let Some(size) = declared {
                    if size != len {
                        bail!("{} is {} bytes, expected {}", file.display(), len, size);
                    }
                }
                Ok(len)
            }
            Source::Striped { parts } => {
                let mut sizes = Vec::with_capacity(RAID_PARTS);
                for part in parts {
                    let meta = tokio::fs::metadata(part)
                        .await
                        .with_context(|| format!("Missing shard {}", part.display()))?;
                    sizes.push(meta.len());
                }
                let size = declared.unwrap_or_else(|| sizes[1..].iter().sum());
                verify_shard_sizes(&sizes, size).context("Shard files do not match the file size")?;
                Ok(size)
            }
        }
    }
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Read handle for one connection.
pub struct RangeReader {
    file: File,
}

impl RangeReader {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self { file })
    }

    /// Read `[start, end)` of the underlying file.
    pub async fn read_range(&mut self, start: u64, end: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; (end - start) as usize];
        self.file.seek(SeekFrom::Start(start)).await?;
        self.file
            .read_exact(&mut buf)
            .await
            .with_context(|| format!("Short read at {}..{}", start, end))?;
        Ok(buf)
    }
}
