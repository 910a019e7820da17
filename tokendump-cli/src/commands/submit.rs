//! The `submit` command: one submission attempt from the persisted cache.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use tokendump_cache::FactCache;
use tokendump_harvest::{HarvestConfig, SubmissionCoordinator, SubmitOutcome};
use tokendump_web::WebClient;

use crate::{Cli, ExitCode, OutputFormat};

/// Arguments for the submit command.
#[derive(Args, Default)]
pub struct SubmitArgs {
    /// Report what would be submitted without uploading anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Runs the submit command.
pub async fn run(args: &SubmitArgs, cli: &Cli, config: &HarvestConfig) -> Result<()> {
    config.validate()?;

    let cache = Arc::new(FactCache::load(config.cache_path()).await);

    if args.dry_run {
        let apps = cache.app_tokens_for_submission().await;
        let packages = cache.package_tokens_for_submission().await;
        let depots = cache.depot_keys_for_submission().await;

        if cli.format == OutputFormat::Json {
            let summary = serde_json::json!({
                "endpoint": config.submit_url(),
                "apps": apps.len(),
                "packages": packages.len(),
                "depots": depots.len(),
            });
            println!("{summary}");
        } else {
            println!("Would submit to {}:", config.submit_url());
            println!("  {} app tokens", apps.len());
            println!("  {} package tokens", packages.len());
            println!("  {} depot keys", depots.len());
        }
        return Ok(());
    }

    let web = Arc::new(WebClient::new()?);
    let coordinator = SubmissionCoordinator::new(cache, web, config.clone(), None);

    let outcome = coordinator.try_submit().await;
    match outcome {
        SubmitOutcome::Accepted {
            apps,
            packages,
            depots,
        } => {
            println!("Accepted: {apps} apps, {packages} packages, {depots} depots");
        }
        SubmitOutcome::NoData => {
            println!("Nothing pending; no submission made");
        }
        SubmitOutcome::RateLimited => {
            eprintln!("The endpoint rate-limited this submission; try again later");
            std::process::exit(ExitCode::SubmitFailed as i32);
        }
        SubmitOutcome::Failed | SubmitOutcome::Skipped => {
            eprintln!("Submission failed; run with --verbose for details");
            std::process::exit(ExitCode::SubmitFailed as i32);
        }
    }

    Ok(())
}
