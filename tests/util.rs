// tests/util.rs
// Shared test helpers for integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bridge_sync::blockchain::bridge::mock::{
    RecordingNotifier, ScriptedBridge, StaticWallet, WALLET_A,
};
use bridge_sync::core::clock::{Clock, ManualClock};
use bridge_sync::core::config::SyncConfig;
use bridge_sync::network::ConnectivityMonitor;
use bridge_sync::service::{
    BackgroundSyncCoordinator, BridgeOrchestrator, ReplayDeps, ReplaySettings, Replayer,
};
use bridge_sync::storage::{
    DrainLock, PendingQueue, SqliteDrainLock, SqlitePendingQueue, SqliteStorage,
    SqliteTransactionStore, TransactionStore,
};

pub const T0: i64 = 1_700_000_000_000;

/// One execution context: its own storage handle on a shared database plus
/// scripted collaborators.
pub struct Context {
    pub storage: SqliteStorage,
    pub queue: Arc<SqlitePendingQueue>,
    pub records: Arc<SqliteTransactionStore>,
    pub lock: Arc<SqliteDrainLock>,
    pub bridge: Arc<ScriptedBridge>,
    pub wallet: Arc<StaticWallet>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub connectivity: Arc<ConnectivityMonitor>,
}

impl Context {
    pub async fn in_memory() -> Self {
        Self::open("sqlite::memory:").await
    }

    pub async fn open(url: &str) -> Self {
        let storage = SqliteStorage::new_with_url(url).await.unwrap();
        Self::with_storage(storage, Arc::new(ScriptedBridge::new()), Arc::new(ManualClock::new(T0)))
    }

    /// Second context on the same database and bridge, as a background worker would be.
    pub async fn sibling(&self, url: &str) -> Self {
        let storage = SqliteStorage::new_with_url(url).await.unwrap();
        let mut ctx = Self::with_storage(storage, self.bridge.clone(), self.clock.clone());
        ctx.wallet = self.wallet.clone();
        ctx.connectivity = self.connectivity.clone();
        ctx
    }

    fn with_storage(storage: SqliteStorage, bridge: Arc<ScriptedBridge>, clock: Arc<ManualClock>) -> Self {
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        Self {
            queue: Arc::new(storage.pending_queue(dyn_clock.clone())),
            records: Arc::new(storage.transaction_store(dyn_clock)),
            lock: Arc::new(storage.drain_lock()),
            storage,
            bridge,
            wallet: Arc::new(StaticWallet::connected(WALLET_A, 42161)),
            notifier: Arc::new(RecordingNotifier::default()),
            clock,
            connectivity: Arc::new(ConnectivityMonitor::new(true)),
        }
    }

    pub fn deps(&self) -> ReplayDeps {
        ReplayDeps::new(
            self.queue.clone() as Arc<dyn PendingQueue>,
            self.records.clone() as Arc<dyn TransactionStore>,
            self.bridge.clone(),
            self.wallet.clone(),
            self.notifier.clone(),
            self.lock.clone() as Arc<dyn DrainLock>,
            self.clock.clone(),
        )
    }

    pub fn replayer(&self) -> Arc<Replayer> {
        Arc::new(Replayer::new(self.deps(), ReplaySettings::default()))
    }

    pub fn orchestrator(&self) -> Arc<BridgeOrchestrator> {
        self.orchestrator_with(BackgroundSyncCoordinator::unsupported())
    }

    pub fn orchestrator_with(&self, background: BackgroundSyncCoordinator) -> Arc<BridgeOrchestrator> {
        Arc::new(BridgeOrchestrator::new(
            self.deps(),
            self.connectivity.clone(),
            background,
            &SyncConfig::default(),
        ))
    }
}

/// Polls `check` until it holds, failing the test after five seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
