//! Logvault collector CLI
//!
//! Runs one collection pass over the fleet (the default), writes a starter
//! config file, or stores a host secret in the OS keyring.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logvault_collector::credentials::KeyringCredentials;
use logvault_collector::{Collector, CollectorConfig, CollectorError};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Config file (defaults to $LOGVAULT_CONFIG or the user config directory)
    #[arg(long, env = "LOGVAULT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Debug logging for the collector
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one collection pass over the fleet
    Run {
        /// Also write the run summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Write a config file with every default spelled out
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Store the SSH password of a host identifier in the OS keyring
    StoreSecret {
        identifier: String,
        /// Remove the stored secret instead
        #[arg(long)]
        delete: bool,
    },
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "logvault_collector=debug"
    } else {
        "logvault_collector=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(CollectorError::FatalConfig(path)) = e.downcast_ref::<CollectorError>() {
                eprintln!("Fleet definition file not found: {}", path.display());
            } else {
                error!("{:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => CollectorConfig::config_file_path()?,
    };

    match cli.command.unwrap_or(Command::Run { summary: None }) {
        Command::Run { summary } => run(&config_path, summary).await,
        Command::InitConfig { force } => init_config(&config_path, force).await,
        Command::StoreSecret { identifier, delete } => store_secret(&identifier, delete),
    }
}

async fn run(config_path: &Path, summary_path: Option<PathBuf>) -> Result<()> {
    let config = CollectorConfig::load(Some(config_path))
        .await
        .with_context(|| format!("Cannot load {}", config_path.display()))?;
    let collector = Collector::from_config(&config)?;

    let today = chrono::Local::now().date_naive();
    info!("Collection pass for {}", today);
    let summary = collector.run(&config, today).await?;

    if let Some(path) = summary_path {
        summary.write_json(&path).await?;
        info!("Run summary written to {}", path.display());
    }
    Ok(())
}

async fn init_config(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", config_path.display());
    }
    CollectorConfig::default().save(config_path).await?;
    println!("Config written to {}", config_path.display());
    Ok(())
}

fn store_secret(identifier: &str, delete: bool) -> Result<()> {
    if delete {
        KeyringCredentials::delete_secret(identifier)?;
        println!("Secret of {identifier} removed");
        return Ok(());
    }

    eprint!("Password for host {identifier}: ");
    io::stderr().flush()?;
    let mut secret = String::new();
    io::stdin().lock().read_line(&mut secret)?;
    let secret = secret.trim_end_matches(['\r', '\n']);
    if secret.is_empty() {
        anyhow::bail!("empty password, nothing stored");
    }

    KeyringCredentials::store_secret(identifier, secret)?;
    println!("Secret of {identifier} stored");
    Ok(())
}
