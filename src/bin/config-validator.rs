//! # Navette Configuration Validator
//!
//! Command-line tool for validating navette configuration files across
//! environments before a service is started with them.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use navette_core::config::ConfigManager;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate navette configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration
    Validate,

    /// Print the effective configuration as JSON, secrets masked
    Show,

    /// List environments that have an override file
    Environments,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::Validate) | None => validate(&cli),
        Some(Commands::Show) => show(&cli),
        Some(Commands::Environments) => list_environments(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration check completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration check failed: {e:#}");
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

fn config_dir(cli: &Cli) -> PathBuf {
    cli.config_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("config"))
}

fn load(cli: &Cli) -> anyhow::Result<std::sync::Arc<ConfigManager>> {
    let directory = config_dir(cli);
    ConfigManager::load_from_directory_with_env(Some(directory.clone()), &cli.environment)
        .with_context(|| {
            format!(
                "loading {} configuration from {}",
                cli.environment,
                directory.display()
            )
        })
}

fn validate(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let config = manager.config();

    println!("Environment:     {}", manager.environment());
    println!("Directory:       {}", manager.config_directory().display());
    println!(
        "Database:        {}",
        if config.database.database_url().is_some() {
            "configured"
        } else {
            "not configured (in-memory store only)"
        }
    );
    println!("Floor policy:    {:?}", config.conversion.floor_policy);
    println!("Recalculation:   {:?}", config.conversion.recalculation);
    println!(
        "Jobs:            {} attempts, backoff {:?} ms, {} workers, queue {}",
        config.jobs.max_attempts,
        config.jobs.backoff_ms,
        config.jobs.worker_count,
        config.jobs.queue_capacity
    );
    println!("Event channel:   {}", config.events.channel_capacity);
    println!();
    println!("Configuration is valid");
    Ok(())
}

fn show(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let rendered = serde_json::to_string_pretty(&manager.debug_config())?;
    println!("{rendered}");
    Ok(())
}

fn list_environments(cli: &Cli) -> anyhow::Result<()> {
    let directory = config_dir(cli);
    let environments = environments_in(&directory)?;

    println!("Configuration directory: {}", directory.display());
    if environments.is_empty() {
        println!("No environment overrides found");
    }
    for environment in environments {
        println!("  - {environment}");
    }
    Ok(())
}

fn environments_in(directory: &Path) -> anyhow::Result<Vec<String>> {
    if !directory.is_dir() {
        bail!("{} is not a directory", directory.display());
    }

    let mut environments: Vec<String> = std::fs::read_dir(directory)
        .with_context(|| format!("reading {}", directory.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.strip_prefix("navette.")
                .and_then(|rest| rest.strip_suffix(".toml"))
                .filter(|environment| !environment.is_empty())
                .map(str::to_string)
        })
        .collect();
    environments.sort();
    Ok(environments)
}
