use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Operator CLI for the pending bridge queue and bridge history
#[derive(Debug, Parser)]
#[command(name = "bridge-sync", about = "Inspect and maintain the offline bridge queue", version)]
pub struct Cli {
    /// Config file (defaults to $BRIDGE_SYNC_CONFIG, then bridge-sync.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Overrides storage.database_url
    #[arg(long, global = true)]
    pub database_url: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Pending bridges captured while offline
    Queue {
        #[command(subcommand)]
        action: QueueCommand,
    },
    /// Bridge records, newest first
    History {
        /// Only records still pending or executing
        #[arg(long)]
        pending: bool,
    },
    /// One bridge record by execution id
    Record { id: String },
    /// Run the retention sweep now
    Purge {
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    List {
        /// Only entries for this wallet
        #[arg(long)]
        wallet: Option<String>,
    },
    Show {
        id: String,
    },
    Remove {
        id: String,
    },
    /// Drop every queued bridge
    Clear {
        #[arg(long)]
        yes: bool,
    },
}
