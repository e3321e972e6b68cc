//! shboost - race-free shell fragments for workflow jobs
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use shboost::cli::{Cli, Commands};
use shboost::config::ConfigManager;
use shboost::error::BoostResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> BoostResult<ExitCode> {
    let cli = Cli::parse();

    // Configuration decides the log format, so it is loaded first
    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let config = config_manager.load().await?;

    // Initialize logging: 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("shboost=warn"),
        1 => EnvFilter::new("shboost=info"),
        _ => EnvFilter::new("shboost=debug"),
    };

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .init();
    }
    debug!("Loaded configuration from {}", config_manager.path().display());

    // Dispatch to command
    match cli.command {
        Commands::Render(args) => shboost::cli::commands::render(args, &config).await?,
        Commands::Run(args) => {
            let code = shboost::cli::commands::run(args, &config).await?;
            return Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)));
        }
        Commands::Hash(args) => shboost::cli::commands::hash(args).await?,
        Commands::Env(args) => shboost::cli::commands::env(args, &config).await?,
        Commands::Mount(args) => shboost::cli::commands::mount(args, &config).await?,
        Commands::Cache(args) => shboost::cli::commands::cache(args, &config).await?,
        Commands::Config(args) => {
            shboost::cli::commands::config(args, &config, &config_manager).await?
        }
    }
    Ok(ExitCode::SUCCESS)
}
