//! The `config` command: inspect and bootstrap configuration.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use tokendump_harvest::HarvestConfig;

use crate::{Cli, OutputFormat};

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    /// What to do. Defaults to showing the effective configuration.
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration.
    Show,
    /// Print the config file path.
    Path,
    /// Write a default config file if none exists.
    Init,
}

/// Runs the config command.
pub async fn run(
    args: &ConfigArgs,
    cli: &Cli,
    config: &HarvestConfig,
    config_path: &Path,
) -> Result<()> {
    match args.action.as_ref().unwrap_or(&ConfigAction::Show) {
        ConfigAction::Show => {
            if cli.format == OutputFormat::Json && !cli.pretty {
                println!("{}", serde_json::to_string(config)?);
            } else {
                println!("{}", serde_json::to_string_pretty(config)?);
            }
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Init => {
            if config_path.exists() {
                println!("Config already exists at {}", config_path.display());
                return Ok(());
            }
            HarvestConfig::default()
                .save(config_path)
                .await
                .with_context(|| format!("writing {}", config_path.display()))?;
            println!("Wrote default config to {}", config_path.display());
        }
    }

    Ok(())
}
