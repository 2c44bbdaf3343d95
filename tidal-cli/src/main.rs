use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tidal_cli::app::{bootstrap, run_start, run_stop};
use tidal_cli::settings::load_config;
use tidal_cli::telemetry::init_tracing;

#[derive(Parser)]
#[command(author, version, about = "Tidal advisor runtime")]
struct Cli {
    /// Increases logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Path to the runtime configuration file
    #[arg(long, default_value = "config/tidal.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the configured advisor fleet and run until interrupted
    Start,
    /// Validate the configuration and stop this session's advisors
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).context("failed to load configuration")?;

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| match cli.verbose {
        0 => config.log_level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    });
    init_tracing(&filter).context("failed to initialize logging")?;

    let state = bootstrap(&config)?;
    match cli.command {
        Commands::Start => run_start(&state).await,
        Commands::Stop => run_stop(&state).await,
    }
}
