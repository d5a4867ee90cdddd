//! Durable lock shared by every execution context that can drain the queue.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::core::errors::BridgeError;

#[async_trait]
pub trait DrainLock: Send + Sync {
    /// Takes `name` for `holder` unless another holder refreshed it within
    /// `stale_after_ms`. Re-acquiring an own lock succeeds.
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        now_ms: i64,
        stale_after_ms: i64,
    ) -> Result<bool, BridgeError>;

    /// Extends an owned lease. `false` when the lock was reclaimed by someone else.
    async fn refresh(&self, name: &str, holder: &str, now_ms: i64) -> Result<bool, BridgeError>;

    async fn release(&self, name: &str, holder: &str) -> Result<(), BridgeError>;
}

pub(crate) async fn init_schema(pool: &SqlitePool) -> Result<(), BridgeError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_locks (
            name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            acquired_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| BridgeError::PersistenceUnavailable(format!("Failed to create sync_locks table: {}", e)))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SqliteDrainLock {
    pool: SqlitePool,
}

impl SqliteDrainLock {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DrainLock for SqliteDrainLock {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        now_ms: i64,
        stale_after_ms: i64,
    ) -> Result<bool, BridgeError> {
        // Single statement so two contexts racing on the same file cannot both win.
        let res = sqlx::query(
            r#"
            INSERT INTO sync_locks (name, holder, acquired_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at
            WHERE sync_locks.holder = excluded.holder OR sync_locks.acquired_at < ?4
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(now_ms)
        .bind(now_ms.saturating_sub(stale_after_ms))
        .execute(&self.pool)
        .await?;

        let acquired = res.rows_affected() == 1;
        debug!(lock = %name, %holder, acquired, "Drain lock acquire");
        Ok(acquired)
    }

    async fn refresh(&self, name: &str, holder: &str, now_ms: i64) -> Result<bool, BridgeError> {
        let res = sqlx::query("UPDATE sync_locks SET acquired_at = ?1 WHERE name = ?2 AND holder = ?3")
            .bind(now_ms)
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            warn!(lock = %name, %holder, "Drain lock lease lost");
        }
        Ok(res.rows_affected() == 1)
    }

    async fn release(&self, name: &str, holder: &str) -> Result<(), BridgeError> {
        sqlx::query("DELETE FROM sync_locks WHERE name = ?1 AND holder = ?2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        debug!(lock = %name, %holder, "Drain lock released");
        Ok(())
    }
}
