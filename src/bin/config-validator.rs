//! # Dispatch Configuration Validator
//!
//! Command-line tool for validating dispatch configuration files per
//! environment before a service starts with them.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use delegate_dispatch::config::{ConfigManager, DispatchConfig};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate delegate dispatch configuration files")]
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
    /// Load and validate the configuration for the environment
    Validate,

    /// List environments that have an override file
    Environments,

    /// Print the resolved configuration as JSON
    Show,

    /// Show fields that differ between two environments
    Compare {
        #[arg(short, long, default_value = "development")]
        base: String,

        #[arg(short, long)]
        target: String,
    },
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
        Some(Commands::Environments) => list_environments(&cli),
        Some(Commands::Show) => show(&cli),
        Some(Commands::Compare { base, target }) => compare(&cli, base, target),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli, environment: &str) -> anyhow::Result<DispatchConfig> {
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)
        .with_context(|| format!("loading configuration for environment '{environment}'"))?;
    Ok(manager.config().clone())
}

fn config_dir(cli: &Cli) -> PathBuf {
    cli.config_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("config"))
}

fn validate(cli: &Cli) -> anyhow::Result<()> {
    println!("🔧 Validating Dispatch Configuration");
    println!("Environment: {}", cli.environment);
    println!("Config Directory: {}", config_dir(cli).display());
    println!();

    let config = load(cli, &cli.environment)?;

    println!("✅ Configuration loaded and validated");
    println!("   default timeout:   {}ms", config.default_timeout_ms);
    println!("   max timeout:       {}ms", config.max_timeout_ms);
    println!("   sweep interval:    {}ms", config.sweep_interval_ms);
    println!("   status poll:       {}ms", config.status_poll_interval_ms);
    println!("   record retention:  {}s", config.record_retention_seconds);
    println!("   heartbeat timeout: {}s", config.delegate_heartbeat_timeout_seconds);
    println!("   selection:         {:?}", config.delegate_selection);

    if config.sweep_interval_ms > config.default_timeout_ms {
        println!(
            "⚠️  sweep interval exceeds the default timeout; async expiry will lag by up to {}ms",
            config.sweep_interval_ms
        );
    }

    Ok(())
}

fn list_environments(cli: &Cli) -> anyhow::Result<()> {
    let dir = config_dir(cli);
    println!("📋 Environments in {}:", dir.display());

    let entries = std::fs::read_dir(&dir)
        .with_context(|| format!("reading configuration directory {}", dir.display()))?;

    let mut environments: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|name| {
            name.strip_prefix("dispatch.")
                .and_then(|rest| rest.strip_suffix(".toml"))
                .map(str::to_string)
        })
        .collect();
    environments.sort();

    if environments.is_empty() {
        println!("   (no environment overrides, base file only)");
    }
    for environment in environments {
        println!("   - {environment}");
    }

    Ok(())
}

fn show(cli: &Cli) -> anyhow::Result<()> {
    let config = load(cli, &cli.environment)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn compare(cli: &Cli, base: &str, target: &str) -> anyhow::Result<()> {
    if base == target {
        bail!("base and target environments are both '{base}'");
    }

    let base_value = serde_json::to_value(load(cli, base)?)?;
    let target_value = serde_json::to_value(load(cli, target)?)?;

    println!("🔍 Comparing {base} → {target}");

    let (Some(base_fields), Some(target_fields)) = (base_value.as_object(), target_value.as_object())
    else {
        bail!("configuration did not serialize to an object");
    };

    let missing = serde_json::Value::Null;
    let mut differences = 0;
    for (field, base_field) in base_fields {
        let target_field = target_fields.get(field).unwrap_or(&missing);
        if base_field != target_field {
            differences += 1;
            println!("   {field}: {base_field} → {target_field}");
        }
    }

    if differences == 0 {
        println!("   No differences");
    }

    Ok(())
}
