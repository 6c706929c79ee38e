//! Brim CLI - bank-feed sync and budget analysis
//!
//! Usage:
//!   brim serve                  Start the API server + sync scheduler
//!   brim sync --account 1       Sync one account now
//!   brim summary --user 1       Sync, then print the user summary
//!   brim bills --user 1         Sync, then print current-month bills

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Serve { listen } => commands::cmd_serve(config, listen.as_deref()).await,
        Commands::Sync { account } => commands::cmd_sync(config, account).await,
        Commands::Summary { account, user } => commands::cmd_summary(config, user, account).await,
        Commands::Bills { user } => commands::cmd_bills(config, user).await,
        Commands::Status => commands::cmd_status(config).await,
    }
}
