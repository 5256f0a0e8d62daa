use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "tether", about = "Session-bound locks on Consul")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a tether.toml configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Consul agent address (host:port), overrides configuration
    #[arg(short, long, global = true)]
    address: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    Config,
    /// Acquire a lock and hold it until interrupted
    Lock(commands::lock::LockArgs),
    /// Inspect and destroy sessions
    Sessions(commands::sessions::SessionsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = config::ConfigLoader::load(cli.config.as_deref())?;
    if let Some(address) = cli.address {
        config.consul.address = address;
    }

    match cli.command {
        Commands::Config => commands::show_config(&config),
        Commands::Lock(args) => commands::lock::run(args, config).await,
        Commands::Sessions(args) => commands::sessions::run(args, config).await,
    }
}
