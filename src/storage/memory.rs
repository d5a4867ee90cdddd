//! In-memory storage (for development and tests).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{DrainLock, PendingQueue, TransactionStore};
use crate::blockchain::bridge::{BridgeIntent, PendingBridge, TransactionPatch, TransactionRecord};
use crate::core::clock::Clock;
use crate::core::errors::BridgeError;
use crate::core::validation::addresses_match;

pub struct MemoryTransactionStore {
    records: Arc<RwLock<HashMap<String, TransactionRecord>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryTransactionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { records: Arc::new(RwLock::new(HashMap::new())), clock }
    }
}

fn newest_first(mut records: Vec<TransactionRecord>) -> Vec<TransactionRecord> {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    records
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn create(&self, record: &TransactionRecord) -> Result<(), BridgeError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(BridgeError::Conflict(format!("Bridge record already exists: {}", record.id)));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Option<TransactionRecord> {
        self.records.read().await.get(id).cloned()
    }

    async fn list(&self) -> Vec<TransactionRecord> {
        newest_first(self.records.read().await.values().cloned().collect())
    }

    async fn list_pending(&self) -> Vec<TransactionRecord> {
        newest_first(
            self.records
                .read()
                .await
                .values()
                .filter(|r| r.status.is_in_flight())
                .cloned()
                .collect(),
        )
    }

    async fn update(
        &self,
        id: &str,
        patch: &TransactionPatch,
    ) -> Result<TransactionRecord, BridgeError> {
        let mut records = self.records.write().await;
        let current = records
            .get(id)
            .ok_or_else(|| BridgeError::NotFound(format!("Bridge record not found: {}", id)))?;
        let next = current.apply(patch, self.clock.now_ms())?;
        records.insert(id.to_string(), next.clone());
        Ok(next)
    }

    async fn remove(&self, id: &str) -> bool {
        self.records.write().await.remove(id).is_some()
    }

    async fn purge_older_than(&self, max_age_ms: i64) -> u64 {
        let cutoff = self.clock.now_ms().saturating_sub(max_age_ms);
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.created_at >= cutoff);
        (before - records.len()) as u64
    }
}

pub struct MemoryPendingQueue {
    // Insertion order doubles as the tiebreak for equal timestamps.
    entries: Arc<RwLock<Vec<PendingBridge>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryPendingQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Arc::new(RwLock::new(Vec::new())), clock }
    }

    async fn oldest_first(&self, wallet_address: Option<&str>) -> Vec<PendingBridge> {
        let mut entries: Vec<PendingBridge> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| wallet_address.map_or(true, |w| addresses_match(e.wallet_address(), w)))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        entries
    }
}

#[async_trait]
impl PendingQueue for MemoryPendingQueue {
    async fn enqueue(&self, intent: BridgeIntent) -> Result<PendingBridge, BridgeError> {
        let entry = PendingBridge::new(intent, self.clock.now_ms());
        self.entries.write().await.push(entry.clone());
        Ok(entry)
    }

    async fn list_all(&self) -> Result<Vec<PendingBridge>, BridgeError> {
        let mut entries = self.oldest_first(None).await;
        entries.reverse();
        Ok(entries)
    }

    async fn list_for_wallet(&self, wallet_address: &str) -> Result<Vec<PendingBridge>, BridgeError> {
        let mut entries = self.oldest_first(Some(wallet_address)).await;
        entries.reverse();
        Ok(entries)
    }

    async fn list_for_wallet_fifo(
        &self,
        wallet_address: &str,
    ) -> Result<Vec<PendingBridge>, BridgeError> {
        Ok(self.oldest_first(Some(wallet_address)).await)
    }

    async fn get(&self, id: &str) -> Result<Option<PendingBridge>, BridgeError> {
        Ok(self.entries.read().await.iter().find(|e| e.id == id).cloned())
    }

    async fn remove(&self, id: &str) -> Result<bool, BridgeError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() != before)
    }

    async fn clear(&self) -> Result<u64, BridgeError> {
        let mut entries = self.entries.write().await;
        let cleared = entries.len() as u64;
        entries.clear();
        Ok(cleared)
    }

    async fn len(&self) -> Result<usize, BridgeError> {
        Ok(self.entries.read().await.len())
    }
}

/// Lock table for a single process. Same lease rules as the SQLite lock.
#[derive(Default)]
pub struct MemoryDrainLock {
    locks: Arc<RwLock<HashMap<String, (String, i64)>>>,
}

impl MemoryDrainLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DrainLock for MemoryDrainLock {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        now_ms: i64,
        stale_after_ms: i64,
    ) -> Result<bool, BridgeError> {
        let mut locks = self.locks.write().await;
        let free = match locks.get(name) {
            None => true,
            Some((current, acquired_at)) => {
                current == holder || *acquired_at < now_ms.saturating_sub(stale_after_ms)
            }
        };
        if free {
            locks.insert(name.to_string(), (holder.to_string(), now_ms));
        }
        Ok(free)
    }

    async fn refresh(&self, name: &str, holder: &str, now_ms: i64) -> Result<bool, BridgeError> {
        let mut locks = self.locks.write().await;
        match locks.get_mut(name) {
            Some((current, acquired_at)) if current == holder => {
                *acquired_at = now_ms;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, name: &str, holder: &str) -> Result<(), BridgeError> {
        let mut locks = self.locks.write().await;
        if locks.get(name).is_some_and(|(current, _)| current == holder) {
            locks.remove(name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::bridge::mock::{sample_intent, sample_quote, WALLET_A, WALLET_B};
    use crate::blockchain::bridge::BridgeStatus;
    use crate::core::clock::ManualClock;

    #[tokio::test]
    async fn test_memory_store_rejects_backwards_status() {
        let clock = Arc::new(ManualClock::new(10));
        let store = MemoryTransactionStore::new(clock);
        store.create(&TransactionRecord::accepted("e", &sample_quote("1"), 10)).await.unwrap();
        store
            .update("e", &TransactionPatch { status: Some(BridgeStatus::Failed), ..Default::default() })
            .await
            .unwrap();
        let back = store
            .update("e", &TransactionPatch { status: Some(BridgeStatus::Executing), ..Default::default() })
            .await;
        assert!(matches!(back, Err(BridgeError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn test_memory_queue_orders_and_filters() {
        let clock = Arc::new(ManualClock::new(1));
        let queue = MemoryPendingQueue::new(clock.clone());
        let a = queue.enqueue(sample_intent("1")).await.unwrap();
        clock.advance(1);
        let mut other = sample_intent("2");
        other.wallet_address = WALLET_B.into();
        queue.enqueue(other).await.unwrap();
        clock.advance(1);
        let c = queue.enqueue(sample_intent("3")).await.unwrap();

        let fifo = queue.list_for_wallet_fifo(WALLET_A).await.unwrap();
        assert_eq!(fifo.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec![a.id.as_str(), c.id.as_str()]);
        assert_eq!(queue.list_for_wallet(WALLET_A).await.unwrap()[0].id, c.id);
        assert_eq!(queue.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_memory_lock_lease() {
        let lock = MemoryDrainLock::new();
        assert!(lock.try_acquire("l", "a", 0, 10).await.unwrap());
        assert!(!lock.try_acquire("l", "b", 5, 10).await.unwrap());
        assert!(lock.try_acquire("l", "b", 11, 10).await.unwrap());
        lock.release("l", "a").await.unwrap();
        assert!(!lock.try_acquire("l", "a", 12, 10).await.unwrap());
    }
}
