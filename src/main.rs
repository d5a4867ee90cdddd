// src/main.rs
//! bridge-sync operator entry point.
use anyhow::{bail, Result};
use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use bridge_sync::cli::{Cli, Commands, QueueCommand};
use bridge_sync::core::clock::{Clock, SystemClock};
use bridge_sync::core::config::{hours_to_ms, SyncConfig};
use bridge_sync::storage::{PendingQueue, SqliteStorage, TransactionStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("BRIDGE_SYNC_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("bridge-sync.toml"));
    let mut config = SyncConfig::load(&config_path)?;
    if let Some(url) = &cli.database_url {
        config.storage.database_url = url.clone();
        config.validate()?;
    }

    info!("Starting bridge-sync v{}", env!("CARGO_PKG_VERSION"));

    let storage = SqliteStorage::open(&config.storage).await?;
    let output = run(cli.command, &storage, &config).await;
    storage.close().await;

    println!("{}", serde_json::to_string_pretty(&output?)?);
    Ok(())
}

async fn run(command: Commands, storage: &SqliteStorage, config: &SyncConfig) -> Result<Value> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let queue = storage.pending_queue(clock.clone());
    let records = storage.transaction_store(clock);

    let value = match command {
        Commands::Queue { action } => match action {
            QueueCommand::List { wallet } => {
                let entries = match wallet {
                    Some(wallet) => queue.list_for_wallet(&wallet).await?,
                    None => queue.list_all().await?,
                };
                json!({ "count": entries.len(), "entries": entries })
            }
            QueueCommand::Show { id } => match queue.get(&id).await? {
                Some(entry) => serde_json::to_value(entry)?,
                None => bail!("pending bridge {} not found", id),
            },
            QueueCommand::Remove { id } => {
                let removed = queue.remove(&id).await?;
                json!({ "id": id, "removed": removed })
            }
            QueueCommand::Clear { yes } => {
                if !yes {
                    bail!("refusing to clear the queue without --yes");
                }
                json!({ "cleared": queue.clear().await? })
            }
        },
        Commands::History { pending } => {
            let list = if pending { records.list_pending().await } else { records.list().await };
            json!({ "count": list.len(), "records": list })
        }
        Commands::Record { id } => match records.get(&id).await {
            Some(record) => serde_json::to_value(record)?,
            None => bail!("bridge record {} not found", id),
        },
        Commands::Purge { max_age_hours } => {
            let hours = max_age_hours.unwrap_or(config.retention.max_age_hours);
            let purged = records.purge_older_than(hours_to_ms(hours)).await;
            json!({ "max_age_hours": hours, "purged": purged })
        }
    };
    Ok(value)
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
