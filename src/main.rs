// QuotaGuard - Main Entry Point
//
// Thin CLI over the quota library:
// - Configuration loading
// - Tracing initialisation
// - File-backed replicated state

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use quotaguard::config::Config;
use quotaguard::quota::notify::advisory_message;
use quotaguard::quota::{
    credential_digest, QuotaManager, SignatureGenerator, StorageSet, SystemClock, UsageNotifier,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

/// QuotaGuard: client-side usage quota with redundant state
#[derive(Parser, Debug)]
#[command(name = "quotaguard")]
#[command(author = "QuotaGuard Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Client-side usage quota with redundant state", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding replicated quota state
    #[arg(long)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the current quota status
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Record one use of the guarded action
    Use,
    /// Activate an administrative override
    Override {
        /// Operator secret
        secret: String,
    },
    /// Print this host's client signature
    Signature,
    /// Print the configuration digest of an override secret
    HashSecret {
        /// Secret to hash
        secret: String,
    },
}

fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { config.log_level()? };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

/// Prints near-limit notices for the operator
fn console_notifier() -> Arc<dyn UsageNotifier> {
    Arc::new(|remaining: u32| {
        if let Some(message) = advisory_message(remaining) {
            eprintln!("{}\n", message);
        }
    })
}

fn build_manager(config: &Config) -> Result<QuotaManager> {
    let state_dir = config.state_dir();
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create state directory {:?}", state_dir))?;
    debug!("Using state directory {:?}", state_dir);

    QuotaManager::new(
        config.quota.clone(),
        SignatureGenerator::host(),
        Arc::new(SystemClock),
        StorageSet::on_disk(&state_dir),
        console_notifier(),
    )
    .context("Failed to initialise quota manager")
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = &args.state_dir {
        config.storage.state_dir = Some(dir.to_string_lossy().into_owned());
    }

    init_tracing(&config, args.verbose)?;

    match args.command {
        Commands::HashSecret { secret } => {
            println!("{}", credential_digest(&secret));
        }
        Commands::Signature => {
            println!("{}", SignatureGenerator::host().compute());
        }
        Commands::Status { json } => {
            let manager = build_manager(&config)?;
            let status = manager.status();
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", status);
            }
        }
        Commands::Use => {
            let manager = build_manager(&config)?;
            let status = manager.status();
            if status.limited {
                anyhow::bail!(
                    "Daily limit reached. Try again in {} hours.",
                    status.reset_in_hours
                );
            }
            manager
                .try_record_use()
                .context("Use was not recorded")?;
            println!("{}", manager.status());
        }
        Commands::Override { secret } => {
            let manager = build_manager(&config)?;
            let token = manager
                .overrides()
                .try_activate(&secret)
                .context("Override denied")?;
            let until = Utc
                .timestamp_millis_opt(token.expires_at)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| token.expires_at.to_string());
            println!("Override granted until {}", until);
        }
    }

    Ok(())
}
