//! The `status` command: summarize the persisted fact cache.

use anyhow::Result;

use tokendump_cache::FactCache;
use tokendump_harvest::HarvestConfig;

use crate::{Cli, OutputFormat};

/// Runs the status command.
pub async fn run(cli: &Cli, config: &HarvestConfig) -> Result<()> {
    let cache_path = config.cache_path();
    let cache = FactCache::load(cache_path.clone()).await;
    let stats = cache.stats().await;

    if cli.format == OutputFormat::Json {
        let json = if cli.pretty {
            serde_json::to_string_pretty(&stats)?
        } else {
            serde_json::to_string(&stats)?
        };
        println!("{json}");
        return Ok(());
    }

    println!("Cache: {}", cache_path.display());
    match stats.updated_at {
        Some(updated) => println!("Last updated: {updated}"),
        None => println!("Last updated: never"),
    }
    println!("Change feed watermark: {}", stats.last_change_number);
    println!();
    println!(
        "{:<16} {:>8} {:>10}",
        "facts", "known", "pending"
    );
    println!(
        "{:<16} {:>8} {:>10}",
        "app tokens", stats.app_tokens, stats.pending_apps
    );
    println!(
        "{:<16} {:>8} {:>10}",
        "package tokens", stats.package_tokens, stats.pending_packages
    );
    println!(
        "{:<16} {:>8} {:>10}",
        "depot keys", stats.depot_keys, stats.pending_depots
    );
    println!();
    println!("Denied app tokens: {}", stats.app_tokens_denied);
    println!("Known change numbers: {}", stats.app_change_numbers);

    Ok(())
}
