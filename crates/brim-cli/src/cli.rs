//! CLI argument definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "brim")]
#[command(about = "Bank-feed sync and budget analysis engine")]
#[command(version)]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server with the background sync scheduler
    Serve {
        /// Listen address override (e.g. 0.0.0.0:8080)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Sync one account (or every due account) and exit
    Sync {
        /// Account to sync; omitted means run one full cycle
        #[arg(long)]
        account: Option<i64>,
    },
    /// Sync, then print the analysis summary as JSON
    Summary {
        /// Per-account summary; omitted prints the user aggregate
        #[arg(long)]
        account: Option<i64>,
        /// User whose accounts to sync and aggregate
        #[arg(long)]
        user: i64,
    },
    /// Sync, then print the user's current-month bills as JSON
    Bills {
        #[arg(long)]
        user: i64,
    },
    /// Show connection status for all configured accounts
    Status,
}
