//! Config Command
//!
//! Shows or initializes ~/.cloudraid/config.toml.

use crate::config::{self, CloudRaidConfig};
use crate::symbols;
use anyhow::Result;
use console::style;

#[derive(Debug, Clone, Copy)]
pub enum ConfigAction {
    Show,
    Path,
    Init { force: bool },
}

/// Run config command
pub fn run(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let cfg = config::load_config()?;
            let raid = &cfg.raid;
            println!();
            println!("{}", style("CloudRaid Configuration").bold().underlined());
            println!();
            println!("{}", style("[raid]").cyan());
            match raid.lines_per_chunk {
                Some(lines) => println!("  lines_per_chunk = {}", lines),
                None => println!("  lines_per_chunk = (derived from max_request_size)"),
            }
            println!("  max_chunks_per_combine = {}", raid.max_chunks_per_combine);
            println!("  pause_chunks = {}", raid.pause_chunks);
            println!("  unpause_chunks = {}", raid.unpause_chunks);
            println!("  retry_budget = {}", raid.retry_budget);
            println!();
            println!("{}", style("[fetch]").cyan());
            println!("  max_request_size = {}", cfg.fetch.max_request_size);
            println!("  connections = {}", cfg.fetch.connections);
            println!();

            let path = config::config_file_path()?;
            println!("{} {}", style("Config file:").dim(), path.display());
            if !path.exists() {
                println!(
                    "{} Run '{}' to create it",
                    style("(not created yet)").yellow(),
                    style("cloudraid config init").green()
                );
            }
        }

        ConfigAction::Path => {
            println!("{}", config::config_file_path()?.display());
        }

        ConfigAction::Init { force } => {
            let path = config::config_file_path()?;
            if path.exists() && !force {
                println!(
                    "{} Config file already exists at {}",
                    style(symbols::WARN).yellow(),
                    path.display()
                );
                println!("Use --force to overwrite");
                return Ok(());
            }

            config::save_config(&CloudRaidConfig::default())?;
            println!(
                "{} Config file created at {}",
                style(symbols::CHECK).green(),
                path.display()
            );
        }
    }

    Ok(())
}
