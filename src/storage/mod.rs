use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::clock::Clock;
use crate::core::config::StorageConfig;
use crate::core::errors::BridgeError;

mod drain_lock;
pub mod memory;
mod pending_queue;
mod transactions;

pub use drain_lock::{DrainLock, SqliteDrainLock};
pub use pending_queue::{PendingQueue, SqlitePendingQueue};
pub use transactions::{SqliteTransactionStore, TransactionStore};

/// SQLite-backed home of the record store, the pending queue and the drain lock.
/// Foreground and background contexts each open their own `SqliteStorage` on
/// the same database file.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    is_memory: bool,
}

impl SqliteStorage {
    pub async fn open(config: &StorageConfig) -> Result<Self, BridgeError> {
        Self::connect(
            &config.database_url,
            config.max_connections.unwrap_or(5),
            Duration::from_secs(config.connection_timeout_seconds.unwrap_or(30)),
        )
        .await
    }

    pub async fn new_with_url(database_url: &str) -> Result<Self, BridgeError> {
        Self::connect(database_url, 5, Duration::from_secs(30)).await
    }

    async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let db_url = normalize_sqlite_url(database_url);
        let is_memory = db_url.contains(":memory:");

        // Avoid logging full DB URL. Log scheme and path length for diagnostics.
        let safe_db_url_info = if let Some((scheme, rest)) = db_url.split_once("://") {
            format!("{}://(redacted, len={})", scheme, rest.len())
        } else {
            "(invalid db_url format)".to_string()
        };
        info!(db = %safe_db_url_info, "[storage] connecting to database");

        let connect_options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| BridgeError::Config(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // Every in-memory connection is its own database: pin exactly one and never recycle it.
        let pool_options = if is_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .min_connections(1)
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800))
        };

        let pool = pool_options
            .acquire_timeout(acquire_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| {
                BridgeError::PersistenceUnavailable(format!("Failed to connect to database: {}", e))
            })?;

        let storage = Self { pool, is_memory };
        storage.initialize_schema().await?;

        info!("Bridge sync storage initialized");
        Ok(storage)
    }

    pub fn is_in_memory(&self) -> bool {
        self.is_memory
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn initialize_schema(&self) -> Result<(), BridgeError> {
        debug!("Initializing database schema");
        transactions::init_schema(&self.pool).await?;
        pending_queue::init_schema(&self.pool).await?;
        drain_lock::init_schema(&self.pool).await?;
        debug!("Database schema initialized");
        Ok(())
    }

    pub fn transaction_store(&self, clock: Arc<dyn Clock>) -> SqliteTransactionStore {
        SqliteTransactionStore::new(self.pool.clone(), clock)
    }

    pub fn pending_queue(&self, clock: Arc<dyn Clock>) -> SqlitePendingQueue {
        SqlitePendingQueue::new(self.pool.clone(), clock)
    }

    pub fn drain_lock(&self) -> SqliteDrainLock {
        SqliteDrainLock::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Accept "sqlite:" or "sqlite://", create the parent directory of file-backed
/// databases and preserve query params.
fn normalize_sqlite_url(database_url: &str) -> String {
    let mut db_url = database_url.to_string();
    if db_url.starts_with("sqlite:") && !db_url.starts_with("sqlite://") {
        db_url = db_url.replacen("sqlite:", "sqlite://", 1);
    }

    if let Some(path) = db_url.strip_prefix("sqlite://") {
        let (path_only, query) = path
            .split_once('?')
            .map(|(p, q)| (p.to_string(), Some(q.to_string())))
            .unwrap_or_else(|| (path.to_string(), None));

        if path_only != ":memory:" && !path_only.is_empty() {
            if let Some(parent) = std::path::Path::new(&path_only).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        warn!("Failed to create database dir {:?}: {}", parent, e);
                    }
                }
            }
            db_url = match query {
                Some(q) => format!("sqlite://{}?{}", path_only, q),
                None => format!("sqlite://{}", path_only),
            };
        }
    }
    db_url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_short_scheme() {
        assert_eq!(normalize_sqlite_url("sqlite::memory:"), "sqlite://:memory:");
    }

    #[test]
    fn test_normalize_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("bridge.db");
        let url = normalize_sqlite_url(&format!("sqlite://{}?mode=rwc", db.display()));
        assert!(url.ends_with("?mode=rwc"));
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn test_open_in_memory() {
        let storage = SqliteStorage::new_with_url("sqlite::memory:").await.unwrap();
        assert!(storage.is_in_memory());
    }
}
