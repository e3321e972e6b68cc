//! Cache command - inspect environments, extractions and script artifacts

use crate::cache::entry::{format_bytes, scan_environments, scan_mounts, scan_scripts};
use crate::cache::entry::{CacheEntry, EntryState};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::BoostResult;
use console::style;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> BoostResult<()> {
    match args.action {
        CacheAction::List { format } => list_entries(config, format),
    }
}

/// Every entry under the configured roots
pub fn collect_entries(config: &Config) -> BoostResult<Vec<CacheEntry>> {
    let mut entries = scan_environments(&config.env_cache())?;
    entries.extend(scan_mounts(&config.paths.mount_root())?);
    entries.extend(scan_scripts(&config.paths.scripts_root())?);
    Ok(entries)
}

fn list_entries(config: &Config, format: OutputFormat) -> BoostResult<()> {
    let entries = collect_entries(config)?;

    if entries.is_empty() && !matches!(format, OutputFormat::Json) {
        println!("No cache entries found.");
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_entry_table(&entries),
        OutputFormat::Json => print_entry_json(&entries)?,
        OutputFormat::Plain => print_entry_plain(&entries),
    }

    Ok(())
}

fn print_entry_table(entries: &[CacheEntry]) {
    println!(
        "{:<40} {:<8} {:<10} {:<10} {:<20}",
        "KEY", "KIND", "STATE", "SIZE", "CREATED"
    );
    println!("{}", "-".repeat(90));

    let mut total_bytes = 0;
    for entry in entries {
        let state_display = match entry.state {
            EntryState::Ready => style("ready").green().to_string(),
            EntryState::Building => style("building").yellow().to_string(),
        };
        let created = entry
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        total_bytes += entry.size_bytes;

        println!(
            "{:<40} {:<8} {:<10} {:<10} {:<20}",
            entry.key,
            entry.kind,
            state_display,
            format_bytes(entry.size_bytes),
            created
        );
    }

    println!();
    println!(
        "Total: {} entr{} ({})",
        entries.len(),
        if entries.len() == 1 { "y" } else { "ies" },
        format_bytes(total_bytes)
    );
}

fn print_entry_json(entries: &[CacheEntry]) -> BoostResult<()> {
    println!("{}", serde_json::to_string_pretty(entries)?);
    Ok(())
}

fn print_entry_plain(entries: &[CacheEntry]) {
    for entry in entries {
        println!("{}", entry.path.display());
    }
}
