//! CloudRaid CLI
//!
//! Local driver for the shard reassembly engine.
//!
//! # Commands
//! - `stripe` - Split a file into six shard files
//! - `fetch` - Reassemble a file from shard files (or copy a plain file)
//! - `geometry` - Show the shard split for a file size
//! - `config` - Show or initialize configuration
//!
//! # Configuration
//! Config file: ~/.cloudraid/config.toml

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod symbols;
mod transport;

use commands::config::ConfigAction;
use commands::{fetch, geometry, stripe};
use transport::Source;

#[derive(Parser)]
#[command(name = "cloudraid")]
#[command(about = "Parity-striped shard reassembly")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a file into part0 (parity) .. part5
    Stripe {
        /// File to split
        input: PathBuf,

        /// Directory for the shard files
        out_dir: PathBuf,
    },

    /// Reassemble a file from local shards
    Fetch {
        /// Output file
        output: PathBuf,

        /// Directory holding part0..part5
        #[arg(long, conflicts_with = "single", required_unless_present = "single")]
        parts: Option<PathBuf>,

        /// Plain (non-striped) source file
        #[arg(long)]
        single: Option<PathBuf>,

        /// Expected file size (derived from the shards when omitted)
        #[arg(long)]
        size: Option<u64>,

        /// Byte offset to resume from
        #[arg(long, default_value = "0")]
        resume: u64,

        /// Stop reading at this byte offset
        #[arg(long)]
        read_to: Option<u64>,

        /// Fail the first request on this connection
        #[arg(long)]
        fail_shard: Option<usize>,

        /// Stream without transfer integrity tracking
        #[arg(long)]
        direct: bool,

        /// Largest request per connection (overrides config file)
        #[arg(long)]
        max_request: Option<u64>,

        /// Connections for plain files (overrides config file)
        #[arg(long)]
        connections: Option<usize>,
    },

    /// Show how a file size is split across shards
    Geometry {
        /// File size in bytes
        size: u64,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Show config file path
    Path,

    /// Initialize config file with defaults
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Stripe { input, out_dir } => {
            stripe::run(stripe::StripeConfig { input, out_dir }).await?;
        }

        Commands::Fetch {
            output,
            parts,
            single,
            size,
            resume,
            read_to,
            fail_shard,
            direct,
            max_request,
            connections,
        } => {
            let cfg = config::load_config()?;
            let source = match (parts, single) {
                (Some(dir), _) => Source::striped(&dir),
                (None, Some(file)) => Source::plain(&file),
                (None, None) => anyhow::bail!("Either --parts or --single is required"),
            };
            let config = fetch::FetchConfig {
                output,
                source,
                size,
                resume,
                read_to,
                fail_shard,
                direct,
                max_request_size: max_request.unwrap_or(cfg.fetch.max_request_size),
                connections: connections.unwrap_or(cfg.fetch.connections),
                raid: cfg.raid,
                progress: true,
            };
            fetch::run(config).await?;
        }

        Commands::Geometry { size, json } => {
            geometry::run(size, json)?;
        }

        Commands::Config { command } => {
            let action = match command {
                None | Some(ConfigCommands::Show) => ConfigAction::Show,
                Some(ConfigCommands::Path) => ConfigAction::Path,
                Some(ConfigCommands::Init { force }) => ConfigAction::Init { force },
            };
            commands::config::run(action)?;
        }
    }

    Ok(())
}
