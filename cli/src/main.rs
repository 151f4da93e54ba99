// pstate: operator CLI for the sender-key distribution state
//
// Opens the configured backend, runs one command against an account's
// tracker and exits.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use config::{Config, LogFormat};
use pstate_core::{
    AccountId, AccountStoreRegistry, DeviceAddress, DistributionId, PrometheusObserver,
};
use prometheus::{Encoder, TextEncoder};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "pstate")]
#[command(about = "Inspect and repair sender-key distribution state", long_about = None)]
#[command(version)]
struct Cli {
    /// Connection descriptor, overrides the config file
    #[arg(long, global = true)]
    db: Option<String>,

    #[arg(long, global = true)]
    db_user: Option<String>,

    #[arg(long, global = true)]
    db_password: Option<String>,

    /// Log every executed statement
    #[arg(long, global = true)]
    log_queries: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print the query latency metrics after the command
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the configured backend kind
    Backend,
    /// List devices holding the key of a distribution id
    Recipients {
        account: AccountId,
        distribution: DistributionId,
    },
    /// Record that devices (`identity.device`) received the key
    Mark {
        account: AccountId,
        distribution: DistributionId,
        #[arg(required = true)]
        devices: Vec<DeviceAddress>,
    },
    /// Forget that devices hold the key of a distribution id
    Revoke {
        account: AccountId,
        distribution: DistributionId,
        #[arg(required = true)]
        devices: Vec<DeviceAddress>,
    },
    /// Drop every record of a distribution id and mint a replacement
    Rotate {
        account: AccountId,
        distribution: DistributionId,
    },
    /// Forget every key held by any device of a recipient
    ForgetRecipient { account: AccountId, identity: String },
    /// Forget devices under every distribution id
    ForgetDevices {
        account: AccountId,
        #[arg(required = true)]
        devices: Vec<DeviceAddress>,
    },
    /// Purge all records of an account
    DeleteAccount { account: AccountId },
    /// Show which devices still need the key of a distribution id
    Needing {
        account: AccountId,
        distribution: DistributionId,
        #[arg(required = true)]
        devices: Vec<DeviceAddress>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load()?;

    // Command-line flags win over the config file
    if let Some(db) = &cli.db {
        config.db_url = db.clone();
    }
    if let Some(user) = &cli.db_user {
        config.db_user = Some(user.clone());
    }
    if let Some(password) = &cli.db_password {
        config.db_password = Some(password.clone());
    }
    if cli.log_queries {
        config.log_queries = true;
    }
    if cli.json_logs {
        config.log_format = LogFormat::Json;
    }

    init_logging(config.log_format);

    let command = match cli.command {
        Commands::Config { action } => return cmd_config(action),
        command => command,
    };

    let settings = config.database_settings();
    let metrics = prometheus::Registry::new();
    let observer = PrometheusObserver::for_settings(&settings, &metrics)
        .context("Failed to register query metrics")?;
    let registry = AccountStoreRegistry::open(settings, Arc::new(observer))
        .context("Invalid database configuration")?;

    let outcome = run(&registry, command);
    registry.close();
    outcome?;

    if cli.metrics {
        print_metrics(&metrics)?;
    }
    Ok(())
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

fn run(registry: &AccountStoreRegistry, command: Commands) -> Result<()> {
    match command {
        Commands::Backend => {
            let kind = registry.resolve_backend_kind()?;
            println!("{} {}", "Backend:".bold(), kind.to_string().bright_cyan());
        }

        Commands::Recipients { account, distribution } => {
            let store = registry.get(&account)?;
            let holders = store
                .sender_key_shared()
                .get_recipients(&distribution)
                .context("Failed to read recipients")?;
            print_devices("Recipients", &holders);
        }

        Commands::Mark { account, distribution, devices } => {
            let store = registry.get(&account)?;
            store
                .sender_key_shared()
                .mark_distributed(&distribution, &devices)
                .context("Failed to mark devices")?;
            println!("{} Marked {} device(s) for {}", "✓".green(), devices.len(), distribution);
        }

        Commands::Revoke { account, distribution, devices } => {
            let store = registry.get(&account)?;
            store
                .sender_key_shared()
                .revoke(&distribution, &devices)
                .context("Failed to revoke devices")?;
            println!("{} Revoked {} device(s) for {}", "✓".green(), devices.len(), distribution);
        }

        Commands::Rotate { account, distribution } => {
            let store = registry.get(&account)?;
            let removed = store
                .sender_key_shared()
                .revoke_all_for_distribution(&distribution)
                .context("Failed to rotate distribution id")?;
            let replacement = DistributionId::random();
            info!("Rotated {} to {}", distribution, replacement);
            println!("{} Dropped {} record(s) of {}", "✓".green(), removed, distribution);
            println!("  New distribution id: {}", replacement.to_string().bright_yellow());
        }

        Commands::ForgetRecipient { account, identity } => {
            let store = registry.get(&account)?;
            let removed = store
                .sender_key_shared()
                .revoke_all_for_recipient(&identity)
                .context("Failed to forget recipient")?;
            println!("{} Forgot {} record(s) of {}", "✓".green(), removed, identity.bright_cyan());
        }

        Commands::ForgetDevices { account, devices } => {
            let store = registry.get(&account)?;
            store
                .sender_key_shared()
                .revoke_devices_everywhere(&devices)
                .context("Failed to forget devices")?;
            println!("{} Forgot {} device(s) everywhere", "✓".green(), devices.len());
        }

        Commands::DeleteAccount { account } => {
            let removed = registry
                .delete_account(&account)
                .context("Failed to delete account")?;
            println!("{} Deleted {} record(s) of {}", "✓".green(), removed, account);
        }

        Commands::Needing { account, distribution, devices } => {
            let store = registry.get(&account)?;
            let needing = store
                .sender_key_shared()
                .devices_needing_key(&distribution, &devices)
                .context("Failed to compute devices needing the key")?;
            print_devices("Needing the key", &needing);
        }

        Commands::Config { action } => cmd_config(action)?,
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let path = Config::config_file()?;
    let mut config = Config::load_from(&path)?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save_to(&path)?;
            println!("{} Set {}", "✓".green(), key.bright_cyan());
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown or unset config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
            println!();
            println!("  File: {}", path.display().to_string().dimmed());
        }
    }

    Ok(())
}

fn print_devices(title: &str, devices: &HashSet<DeviceAddress>) {
    if devices.is_empty() {
        println!("{}", "(none)".dimmed());
        return;
    }

    let mut sorted: Vec<_> = devices.iter().collect();
    sorted.sort();

    println!("{} ({} total)", title.bold(), sorted.len());
    for device in sorted {
        println!("  {} {}", "•".bright_green(), device.to_string().bright_cyan());
    }
}

fn print_metrics(registry: &prometheus::Registry) -> Result<()> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    print!("{}", String::from_utf8(buffer).context("Metrics are not valid UTF-8")?);
    Ok(())
}
