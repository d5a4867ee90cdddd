//! Transaction Record Store: best-effort history of every bridge attempt.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::blockchain::bridge::{TransactionPatch, TransactionRecord};
use crate::core::clock::Clock;
use crate::core::errors::BridgeError;

/// Durable keyed history. Storage outages degrade to neutral results with a
/// warning; `NotFound`, `Conflict` and `InvalidTransition` are still reported.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn create(&self, record: &TransactionRecord) -> Result<(), BridgeError>;
    async fn get(&self, id: &str) -> Option<TransactionRecord>;
    /// Newest first.
    async fn list(&self) -> Vec<TransactionRecord>;
    /// Records still `pending` or `executing`, newest first.
    async fn list_pending(&self) -> Vec<TransactionRecord>;
    async fn update(
        &self,
        id: &str,
        patch: &TransactionPatch,
    ) -> Result<TransactionRecord, BridgeError>;
    async fn remove(&self, id: &str) -> bool;
    /// Removes records created strictly before `now - max_age_ms`.
    async fn purge_older_than(&self, max_age_ms: i64) -> u64;
}

pub(crate) async fn init_schema(pool: &SqlitePool) -> Result<(), BridgeError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bridge_records (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            record TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| BridgeError::PersistenceUnavailable(format!("Failed to create bridge_records table: {}", e)))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bridge_records_created_at ON bridge_records (created_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bridge_records_status ON bridge_records (status)")
        .execute(pool)
        .await?;
    Ok(())
}

#[derive(Clone)]
pub struct SqliteTransactionStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteTransactionStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn decode_rows(rows: Vec<sqlx::sqlite::SqliteRow>) -> Vec<TransactionRecord> {
        rows.into_iter()
            .filter_map(|row| {
                let raw: String = row.get("record");
                match serde_json::from_str::<TransactionRecord>(&raw) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(error = %e, "Skipping undecodable bridge record");
                        None
                    }
                }
            })
            .collect()
    }

    async fn try_update(
        &self,
        id: &str,
        patch: &TransactionPatch,
    ) -> Result<TransactionRecord, BridgeError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT record FROM bridge_records WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(BridgeError::NotFound(format!("Bridge record not found: {}", id)));
        };
        let raw: String = row.get("record");
        let current: TransactionRecord = serde_json::from_str(&raw)?;
        let next = current.apply(patch, self.clock.now_ms())?;

        sqlx::query(
            "UPDATE bridge_records SET status = ?1, updated_at = ?2, record = ?3 WHERE id = ?4",
        )
        .bind(next.status.as_str())
        .bind(next.updated_at)
        .bind(serde_json::to_string(&next)?)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next)
    }
}

#[async_trait]
impl TransactionStore for SqliteTransactionStore {
    async fn create(&self, record: &TransactionRecord) -> Result<(), BridgeError> {
        let payload = serde_json::to_string(record)?;
        let res = sqlx::query(
            r#"
            INSERT INTO bridge_records (id, status, created_at, updated_at, record)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&record.id)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(payload)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => {
                debug!(execution_id = %record.id, "Bridge record created");
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                error!(execution_id = %record.id, "Duplicate bridge record id");
                Err(BridgeError::Conflict(format!("Bridge record already exists: {}", record.id)))
            }
            Err(e) => {
                warn!(execution_id = %record.id, error = %e, "Bridge history unavailable, record not persisted");
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Option<TransactionRecord> {
        match sqlx::query("SELECT record FROM bridge_records WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(row) => row.and_then(|r| Self::decode_rows(vec![r]).pop()),
            Err(e) => {
                warn!(execution_id = %id, error = %e, "Bridge history unavailable");
                None
            }
        }
    }

    async fn list(&self) -> Vec<TransactionRecord> {
        match sqlx::query("SELECT record FROM bridge_records ORDER BY created_at DESC, rowid DESC")
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => Self::decode_rows(rows),
            Err(e) => {
                warn!(error = %e, "Bridge history unavailable");
                Vec::new()
            }
        }
    }

    async fn list_pending(&self) -> Vec<TransactionRecord> {
        match sqlx::query(
            r#"
            SELECT record FROM bridge_records
            WHERE status IN ('pending', 'executing')
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => Self::decode_rows(rows),
            Err(e) => {
                warn!(error = %e, "Bridge history unavailable");
                Vec::new()
            }
        }
    }

    async fn update(
        &self,
        id: &str,
        patch: &TransactionPatch,
    ) -> Result<TransactionRecord, BridgeError> {
        match self.try_update(id, patch).await {
            Err(BridgeError::PersistenceUnavailable(reason)) => {
                warn!(execution_id = %id, %reason, "Bridge history unavailable, update dropped");
                Err(BridgeError::PersistenceUnavailable(reason))
            }
            other => other,
        }
    }

    async fn remove(&self, id: &str) -> bool {
        match sqlx::query("DELETE FROM bridge_records WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
        {
            Ok(res) => res.rows_affected() > 0,
            Err(e) => {
                warn!(execution_id = %id, error = %e, "Bridge history unavailable");
                false
            }
        }
    }

    async fn purge_older_than(&self, max_age_ms: i64) -> u64 {
        let cutoff = self.clock.now_ms().saturating_sub(max_age_ms);
        match sqlx::query("DELETE FROM bridge_records WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
        {
            Ok(res) => {
                if res.rows_affected() > 0 {
                    debug!(purged = res.rows_affected(), cutoff, "Purged old bridge records");
                }
                res.rows_affected()
            }
            Err(e) => {
                warn!(error = %e, "Bridge history unavailable, retention sweep skipped");
                0
            }
        }
    }
}
