// Lint configuration for this crate
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! tokendump CLI - operate on the harvester's persisted state.
//!
//! # Examples
//!
//! ```bash
//! # Show the fact cache and submission backlog
//! tokendump status
//!
//! # JSON output
//! tokendump status --format json --pretty
//!
//! # Run one submission attempt
//! tokendump submit
//!
//! # Inspect what would be submitted without uploading
//! tokendump submit --dry-run
//!
//! # Write a default config file
//! tokendump config init
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tokendump_cache::default_config_path;
use tokendump_harvest::HarvestConfig;

use commands::{config, status, submit};

// ============================================================================
// CLI Definition
// ============================================================================

/// tokendump CLI - inspect the fact cache and drive submissions.
#[derive(Parser)]
#[command(name = "tokendump")]
#[command(about = "Catalog metadata harvester CLI")]
#[command(version)]
pub struct Cli {
    /// Subcommand to run. If none, runs 'status' by default.
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Output format (text or json).
    #[arg(long, short = 'f', default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Path to the config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output (show debug info).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Quiet mode (minimal output).
    #[arg(long, short, global = true)]
    pub quiet: bool,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show the persisted fact cache and submission backlog.
    #[command(visible_alias = "s")]
    Status,

    /// Run one submission attempt against the configured endpoint.
    Submit(submit::SubmitArgs),

    /// Manage configuration.
    Config(config::ConfigArgs),
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// CLI exit codes.
#[repr(i32)]
pub enum ExitCode {
    /// Success.
    Success = 0,
    /// General error.
    Error = 1,
    /// Submission was rejected or rate limited.
    SubmitFailed = 2,
}

// ============================================================================
// Logging Setup
// ============================================================================

fn setup_logging(verbose: bool, quiet: bool) {
    if quiet {
        return; // No logging in quiet mode
    }

    let filter = if verbose {
        EnvFilter::new("tokendump=debug,info")
    } else {
        EnvFilter::new("tokendump=warn")
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let harvest_config = HarvestConfig::load_or_default(&config_path).await;

    let result = match &cli.command {
        Some(Commands::Submit(args)) => submit::run(args, &cli, &harvest_config).await,
        Some(Commands::Config(args)) => config::run(args, &cli, &harvest_config, &config_path).await,
        Some(Commands::Status) | None => status::run(&cli, &harvest_config).await,
    };

    if let Err(e) = result {
        if !cli.quiet {
            eprintln!("Error: {e}");
        }
        std::process::exit(ExitCode::Error as i32);
    }

    Ok(())
}
