use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::collections::BTreeMap;
use std::path::Path;

use super::load_config;
use crate::cli::Output;
use crate::engine::DiskManager;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Check the configuration and output directories without touching files
    Validate,
    /// Display the resolved [dir] properties as JSON
    Show {
        /// Show the whole merged configuration instead
        #[arg(long)]
        all: bool,
    },
}

pub fn execute(args: ConfigArgs, custom_config: Option<&Path>, output: &Output) -> Result<()> {
    let config = load_config(custom_config)?;

    match args.command {
        ConfigCommand::Validate => {
            let manager = DiskManager::new(&config)?;
            let filter = manager.build_filter()?;

            output.success("Configuration is valid");
            output.key_value("Instance:", &manager.instance().to_string(), false);
            output.key_value("Mode:", manager.mode().as_str(), true);
            output.key_value("Filter:", filter.name(), false);
            output.key_value("Input:", &manager.in_dir().display().to_string(), false);
        }
        ConfigCommand::Show { all } => {
            let json = if all {
                serde_json::to_string_pretty(&config)
            } else {
                let properties = config.properties();
                let dir: BTreeMap<&str, &str> = properties.iter().collect();
                serde_json::to_string_pretty(&dir)
            }
            .context("Failed to serialize configuration")?;
            output.raw(&json);
        }
    }

    Ok(())
}
