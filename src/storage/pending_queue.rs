//! Pending Bridge Queue: durable list of bridge intents captured while offline.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::blockchain::bridge::{BridgeIntent, PendingBridge};
use crate::core::clock::Clock;
use crate::core::errors::BridgeError;
use crate::core::validation::normalize_address;

/// Unlike the record store, every queue failure is surfaced: losing an
/// enqueue silently would lose the user's bridge.
#[async_trait]
pub trait PendingQueue: Send + Sync {
    async fn enqueue(&self, intent: BridgeIntent) -> Result<PendingBridge, BridgeError>;
    /// Every wallet, newest first.
    async fn list_all(&self) -> Result<Vec<PendingBridge>, BridgeError>;
    /// Newest first. Address match is case-insensitive.
    async fn list_for_wallet(&self, wallet_address: &str) -> Result<Vec<PendingBridge>, BridgeError>;
    /// Oldest first, the order entries are replayed in.
    async fn list_for_wallet_fifo(
        &self,
        wallet_address: &str,
    ) -> Result<Vec<PendingBridge>, BridgeError>;
    async fn get(&self, id: &str) -> Result<Option<PendingBridge>, BridgeError>;
    /// `false` when the entry was already gone.
    async fn remove(&self, id: &str) -> Result<bool, BridgeError>;
    async fn clear(&self) -> Result<u64, BridgeError>;
    async fn len(&self) -> Result<usize, BridgeError>;
}

pub(crate) async fn init_schema(pool: &SqlitePool) -> Result<(), BridgeError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pending_bridges (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            wallet_address TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            payload TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| BridgeError::PersistenceUnavailable(format!("Failed to create pending_bridges table: {}", e)))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pending_bridges_wallet ON pending_bridges (wallet_address, created_at)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Clone)]
pub struct SqlitePendingQueue {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqlitePendingQueue {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn decode(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<PendingBridge>, BridgeError> {
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.get("payload");
            match serde_json::from_str::<PendingBridge>(&payload) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    let id: String = row.get("id");
                    warn!(pending_id = %id, error = %e, "Skipping undecodable pending bridge");
                }
            }
        }
        Ok(entries)
    }

    async fn by_wallet(
        &self,
        wallet_address: &str,
        newest_first: bool,
    ) -> Result<Vec<PendingBridge>, BridgeError> {
        let sql = if newest_first {
            "SELECT id, payload FROM pending_bridges WHERE wallet_address = ?1 ORDER BY created_at DESC, seq DESC"
        } else {
            "SELECT id, payload FROM pending_bridges WHERE wallet_address = ?1 ORDER BY created_at ASC, seq ASC"
        };
        let rows = sqlx::query(sql)
            .bind(normalize_address(wallet_address))
            .fetch_all(&self.pool)
            .await?;
        Self::decode(rows)
    }
}

#[async_trait]
impl PendingQueue for SqlitePendingQueue {
    async fn enqueue(&self, intent: BridgeIntent) -> Result<PendingBridge, BridgeError> {
        let entry = PendingBridge::new(intent, self.clock.now_ms());
        let payload = serde_json::to_string(&entry)?;

        sqlx::query(
            r#"
            INSERT INTO pending_bridges (id, wallet_address, created_at, payload)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&entry.id)
        .bind(normalize_address(entry.wallet_address()))
        .bind(entry.created_at)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::PersistenceUnavailable(format!("Failed to enqueue bridge: {}", e)))?;

        info!(
            pending_id = %entry.id,
            amount = %entry.intent.amount,
            token = %entry.intent.source_token.symbol,
            "Bridge queued for replay"
        );
        Ok(entry)
    }

    async fn list_all(&self) -> Result<Vec<PendingBridge>, BridgeError> {
        let rows =
            sqlx::query("SELECT id, payload FROM pending_bridges ORDER BY created_at DESC, seq DESC")
                .fetch_all(&self.pool)
                .await?;
        Self::decode(rows)
    }

    async fn list_for_wallet(&self, wallet_address: &str) -> Result<Vec<PendingBridge>, BridgeError> {
        self.by_wallet(wallet_address, true).await
    }

    async fn list_for_wallet_fifo(
        &self,
        wallet_address: &str,
    ) -> Result<Vec<PendingBridge>, BridgeError> {
        self.by_wallet(wallet_address, false).await
    }

    async fn get(&self, id: &str) -> Result<Option<PendingBridge>, BridgeError> {
        let row = sqlx::query("SELECT id, payload FROM pending_bridges WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Self::decode(vec![row])?.pop()),
            None => Ok(None),
        }
    }

    async fn remove(&self, id: &str) -> Result<bool, BridgeError> {
        let res = sqlx::query("DELETE FROM pending_bridges WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let removed = res.rows_affected() > 0;
        debug!(pending_id = %id, removed, "Pending bridge remove");
        Ok(removed)
    }

    async fn clear(&self) -> Result<u64, BridgeError> {
        let res = sqlx::query("DELETE FROM pending_bridges").execute(&self.pool).await?;
        info!(cleared = res.rows_affected(), "Pending bridge queue cleared");
        Ok(res.rows_affected())
    }

    async fn len(&self) -> Result<usize, BridgeError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_bridges")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::bridge::mock::{sample_intent, WALLET_A, WALLET_B};
    use crate::core::clock::ManualClock;
    use crate::storage::SqliteStorage;

    async fn queue(clock: Arc<ManualClock>) -> SqlitePendingQueue {
        let storage = SqliteStorage::new_with_url("sqlite::memory:").await.unwrap();
        storage.pending_queue(clock)
    }

    fn intent_for(wallet: &str, amount: &str) -> BridgeIntent {
        let mut intent = sample_intent(amount);
        intent.wallet_address = wallet.to_string();
        intent
    }

    #[tokio::test]
    async fn test_enqueue_assigns_id_and_timestamp() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let queue = queue(clock).await;
        let entry = queue.enqueue(sample_intent("10.5")).await.unwrap();
        assert!(entry.id.starts_with("1700000000000-"));
        assert_eq!(entry.created_at, 1_700_000_000_000);
        assert_eq!(queue.get(&entry.id).await.unwrap(), Some(entry));
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wallet_filter_is_case_insensitive_and_ordered() {
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = queue(clock.clone()).await;
        let first = queue.enqueue(intent_for(WALLET_A, "1")).await.unwrap();
        clock.advance(10);
        queue.enqueue(intent_for(WALLET_B, "2")).await.unwrap();
        clock.advance(10);
        let third = queue.enqueue(intent_for(&WALLET_A.to_uppercase().replace("0X", "0x"), "3")).await.unwrap();

        let newest: Vec<String> =
            queue.list_for_wallet(WALLET_A).await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(newest, vec![third.id.clone(), first.id.clone()]);

        let fifo: Vec<String> = queue
            .list_for_wallet_fifo(&WALLET_A.to_uppercase().replace("0X", "0x"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(fifo, vec![first.id, third.id]);
        assert_eq!(queue.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_same_millisecond_keeps_insertion_order() {
        let queue = queue(Arc::new(ManualClock::new(5))).await;
        let a = queue.enqueue(sample_intent("1")).await.unwrap();
        let b = queue.enqueue(sample_intent("2")).await.unwrap();
        let fifo = queue.list_for_wallet_fifo(WALLET_A).await.unwrap();
        assert_eq!(fifo[0].id, a.id);
        assert_eq!(fifo[1].id, b.id);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let queue = queue(Arc::new(ManualClock::new(1))).await;
        let a = queue.enqueue(sample_intent("1")).await.unwrap();
        queue.enqueue(sample_intent("2")).await.unwrap();

        assert!(queue.remove(&a.id).await.unwrap());
        assert!(!queue.remove(&a.id).await.unwrap());
        assert_eq!(queue.clear().await.unwrap(), 1);
        assert!(queue.list_all().await.unwrap().is_empty());
    }
}
