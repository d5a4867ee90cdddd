//! Queue replay. [`drain_pass`] is the only code that turns queued entries into
//! executions; every trigger, foreground or background, reaches it through
//! [`Replayer::trigger`].

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::blockchain::bridge::{PendingBridge, TransactionRecord};
use crate::blockchain::traits::{
    BridgeClient, BridgeOutcome, NotificationDispatcher, OutcomeKind, WalletProvider,
};
use crate::core::clock::Clock;
use crate::core::config::SyncSettings;
use crate::core::errors::BridgeError;
use crate::core::validation::addresses_match;
use crate::service::submission::submit_intent;
use crate::service::tracker::StepTracker;
use crate::storage::{DrainLock, PendingQueue, TransactionStore};

/// Everything a drain pass touches. Each execution context builds its own.
#[derive(Clone)]
pub struct ReplayDeps {
    pub queue: Arc<dyn PendingQueue>,
    pub records: Arc<dyn TransactionStore>,
    pub bridge: Arc<dyn BridgeClient>,
    pub wallet: Arc<dyn WalletProvider>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub lock: Arc<dyn DrainLock>,
    pub clock: Arc<dyn Clock>,
    pub tracker: Arc<StepTracker>,
}

impl ReplayDeps {
    pub fn new(
        queue: Arc<dyn PendingQueue>,
        records: Arc<dyn TransactionStore>,
        bridge: Arc<dyn BridgeClient>,
        wallet: Arc<dyn WalletProvider>,
        notifier: Arc<dyn NotificationDispatcher>,
        lock: Arc<dyn DrainLock>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tracker = Arc::new(StepTracker::new(records.clone(), notifier.clone(), clock.clone()));
        Self { queue, records, bridge, wallet, notifier, lock, clock, tracker }
    }
}

#[derive(Debug, Clone)]
pub struct ReplaySettings {
    pub lock_name: String,
    pub lock_stale_after_ms: i64,
    pub submit_timeout: Duration,
}

impl From<&SyncSettings> for ReplaySettings {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            lock_name: settings.lock_name.clone(),
            lock_stale_after_ms: settings.lock_stale_after_ms(),
            submit_timeout: settings.submit_timeout(),
        }
    }
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Entries promoted into a transaction record.
    pub submitted: usize,
    /// Permanently rejected entries, removed without a record.
    pub rejected: usize,
    /// Entries kept after an entry-specific, possibly transient failure.
    pub retained: usize,
    /// Entries that disappeared before their turn.
    pub already_handled: usize,
    /// Queued entries owned by other wallets, left untouched.
    pub skipped_other_wallets: usize,
    pub stopped_on_connectivity: bool,
    pub stopped_on_wallet_change: bool,
    pub lease_lost: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// A pass was already running in this context; it will re-check the queue.
    Coalesced,
    /// Another context holds the durable drain lock.
    LockedElsewhere,
    NoWallet,
}

/// One drain pass for the currently connected wallet. The caller must hold
/// the drain lock as `holder`.
pub async fn drain_pass(
    deps: &ReplayDeps,
    settings: &ReplaySettings,
    holder: &str,
) -> Result<DrainReport, BridgeError> {
    let owner = deps.wallet.current_address().ok_or(BridgeError::WalletNotConnected)?;
    let entries = deps.queue.list_for_wallet_fifo(&owner).await?;
    let total = deps.queue.len().await?;

    let mut report =
        DrainReport { skipped_other_wallets: total.saturating_sub(entries.len()), ..Default::default() };
    if entries.is_empty() {
        return Ok(report);
    }
    info!(wallet = %owner, count = entries.len(), "Draining pending bridges");

    for entry in entries {
        let still_owner = deps
            .wallet
            .current_address()
            .is_some_and(|current| addresses_match(&current, &owner));
        if !still_owner {
            warn!(wallet = %owner, "Connected wallet changed, stopping drain");
            report.stopped_on_wallet_change = true;
            break;
        }

        if !deps.lock.refresh(&settings.lock_name, holder, deps.clock.now_ms()).await? {
            report.lease_lost = true;
            break;
        }

        // Removed by the user (or another pass) since the listing.
        if deps.queue.get(&entry.id).await?.is_none() {
            debug!(pending_id = %entry.id, "Pending bridge already handled");
            report.already_handled += 1;
            continue;
        }

        match submit_intent(
            deps.bridge.as_ref(),
            deps.wallet.as_ref(),
            deps.clock.as_ref(),
            &entry.intent,
            settings.submit_timeout,
        )
        .await
        {
            Ok(submission) => {
                promote(deps, &entry, &submission.record).await;
                report.submitted += 1;
                deps.tracker.spawn(submission.record.clone(), submission.steps).await;
                notify(deps, OutcomeKind::Pending, &entry, None).await;
            }
            Err(e) if e.is_connectivity() => {
                warn!(pending_id = %entry.id, error = %e, "Connectivity lost during drain, stopping pass");
                report.stopped_on_connectivity = true;
                notify(deps, OutcomeKind::Pending, &entry, Some(e.to_string())).await;
                break;
            }
            Err(e) if e.is_permanent() => {
                warn!(pending_id = %entry.id, error = %e, "Pending bridge permanently rejected, dropping");
                deps.queue.remove(&entry.id).await?;
                report.rejected += 1;
                notify(deps, OutcomeKind::Failure, &entry, Some(e.to_string())).await;
            }
            Err(e) => {
                warn!(pending_id = %entry.id, error = %e, "Pending bridge rejected, kept for next pass");
                report.retained += 1;
                notify(deps, OutcomeKind::Failure, &entry, Some(e.to_string())).await;
            }
        }
    }

    info!(wallet = %owner, ?report, "Drain pass finished");
    Ok(report)
}

/// Record first, then drop the entry. A crash in between leaves a possible
/// duplicate, never a lost bridge.
async fn promote(deps: &ReplayDeps, entry: &PendingBridge, record: &TransactionRecord) {
    if let Err(e) = deps.records.create(record).await {
        error!(pending_id = %entry.id, execution_id = %record.id, error = %e, "Failed to record replayed bridge");
    }
    // The execution is live either way; keeping the entry would submit it twice.
    match deps.queue.remove(&entry.id).await {
        Ok(_) => debug!(pending_id = %entry.id, execution_id = %record.id, "Pending bridge promoted"),
        Err(e) => error!(pending_id = %entry.id, error = %e, "Failed to remove promoted pending bridge"),
    }
}

async fn notify(deps: &ReplayDeps, kind: OutcomeKind, entry: &PendingBridge, reason: Option<String>) {
    deps.notifier
        .on_bridge_outcome(
            kind,
            BridgeOutcome {
                amount: entry.intent.amount.clone(),
                token: entry.intent.source_token.symbol.clone(),
                tx_hash: None,
                reason,
            },
        )
        .await;
}

struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-context drain entry point. Guarantees one pass at a time inside the
/// context via the running flag and across contexts via the durable lock.
pub struct Replayer {
    deps: ReplayDeps,
    settings: ReplaySettings,
    holder: String,
    running: AtomicBool,
    recheck: AtomicBool,
}

impl Replayer {
    pub fn new(deps: ReplayDeps, settings: ReplaySettings) -> Self {
        Self {
            deps,
            settings,
            holder: uuid::Uuid::new_v4().to_string(),
            running: AtomicBool::new(false),
            recheck: AtomicBool::new(false),
        }
    }

    pub fn deps(&self) -> &ReplayDeps {
        &self.deps
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn trigger(&self) -> Result<DrainOutcome, BridgeError> {
        if self.running.swap(true, Ordering::SeqCst) {
            self.recheck.store(true, Ordering::SeqCst);
            debug!("Drain already running, re-check scheduled");
            return Ok(DrainOutcome::Coalesced);
        }

        loop {
            let outcome = {
                let _flag = RunningFlag(&self.running);
                self.run_until_settled().await
            };
            // A trigger can land between the last re-check and the flag reset.
            if outcome.is_ok()
                && self.recheck.load(Ordering::SeqCst)
                && !self.running.swap(true, Ordering::SeqCst)
            {
                continue;
            }
            return outcome;
        }
    }

    async fn run_until_settled(&self) -> Result<DrainOutcome, BridgeError> {
        loop {
            self.recheck.store(false, Ordering::SeqCst);
            let outcome = self.locked_pass().await?;
            if !self.recheck.load(Ordering::SeqCst) {
                return Ok(outcome);
            }
            debug!("Re-check requested during drain, running another pass");
        }
    }

    async fn locked_pass(&self) -> Result<DrainOutcome, BridgeError> {
        if self.deps.wallet.current_address().is_none() {
            debug!("No wallet connected, nothing to drain");
            return Ok(DrainOutcome::NoWallet);
        }

        let acquired = self
            .deps
            .lock
            .try_acquire(
                &self.settings.lock_name,
                &self.holder,
                self.deps.clock.now_ms(),
                self.settings.lock_stale_after_ms,
            )
            .await?;
        if !acquired {
            info!(lock = %self.settings.lock_name, "Drain lock held by another context");
            return Ok(DrainOutcome::LockedElsewhere);
        }

        let result = drain_pass(&self.deps, &self.settings, &self.holder).await;
        if let Err(e) = self.deps.lock.release(&self.settings.lock_name, &self.holder).await {
            warn!(error = %e, "Failed to release drain lock, it will go stale");
        }
        result.map(DrainOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::bridge::mock::{
        sample_intent, RecordingNotifier, ScriptedBridge, ScriptedResponse, StaticWallet, WALLET_A,
        WALLET_B,
    };
    use crate::core::clock::ManualClock;
    use crate::storage::memory::{MemoryDrainLock, MemoryPendingQueue, MemoryTransactionStore};

    struct Fixture {
        queue: Arc<MemoryPendingQueue>,
        records: Arc<MemoryTransactionStore>,
        bridge: Arc<ScriptedBridge>,
        wallet: Arc<StaticWallet>,
        notifier: Arc<RecordingNotifier>,
        lock: Arc<MemoryDrainLock>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(1_000));
            Self {
                queue: Arc::new(MemoryPendingQueue::new(clock.clone())),
                records: Arc::new(MemoryTransactionStore::new(clock.clone())),
                bridge: Arc::new(ScriptedBridge::new()),
                wallet: Arc::new(StaticWallet::connected(WALLET_A, 42161)),
                notifier: Arc::new(RecordingNotifier::default()),
                lock: Arc::new(MemoryDrainLock::new()),
                clock,
            }
        }

        fn deps(&self) -> ReplayDeps {
            ReplayDeps::new(
                self.queue.clone(),
                self.records.clone(),
                self.bridge.clone(),
                self.wallet.clone(),
                self.notifier.clone(),
                self.lock.clone(),
                self.clock.clone(),
            )
        }

        async fn enqueue(&self, amount: &str) -> PendingBridge {
            let entry = self.queue.enqueue(sample_intent(amount)).await.unwrap();
            self.clock.advance(1);
            entry
        }
    }

    #[tokio::test]
    async fn test_drain_submits_oldest_first() {
        let fx = Fixture::new();
        fx.enqueue("1").await;
        fx.enqueue("2").await;

        let replayer = Replayer::new(fx.deps(), ReplaySettings::default());
        let DrainOutcome::Completed(report) = replayer.trigger().await.unwrap() else {
            panic!("expected a completed pass")
        };
        assert_eq!(report.submitted, 2);

        let amounts: Vec<String> = fx.bridge.executed().into_iter().map(|q| q.amount).collect();
        assert_eq!(amounts, vec!["1", "2"]);
        assert_eq!(fx.queue.len().await.unwrap(), 0);
        assert_eq!(fx.records.list().await.len(), 2);
        assert!(!replayer.is_running());
    }

    #[tokio::test]
    async fn test_transient_rejection_keeps_entry_and_continues() {
        let fx = Fixture::new();
        let first = fx.enqueue("1").await;
        fx.enqueue("2").await;
        fx.bridge.push(ScriptedResponse::Reject { reason: "rate limited".into(), permanent: false });

        let report = drain_pass(&fx.deps(), &ReplaySettings::default(), "h").await;
        // Without the lock row, refresh reports a lost lease.
        assert!(report.unwrap().lease_lost);

        fx.lock.try_acquire("pending-bridge-drain", "h", 1_000, 60_000).await.unwrap();
        let report = drain_pass(&fx.deps(), &ReplaySettings::default(), "h").await.unwrap();
        assert_eq!(report.retained, 1);
        assert_eq!(report.submitted, 1);
        let left = fx.queue.list_all().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, first.id);
        assert_eq!(fx.notifier.count(OutcomeKind::Failure), 1);
    }

    #[tokio::test]
    async fn test_other_wallet_entries_are_counted_not_touched() {
        let fx = Fixture::new();
        let mut intent = sample_intent("5");
        intent.wallet_address = WALLET_B.into();
        fx.queue.enqueue(intent).await.unwrap();

        let replayer = Replayer::new(fx.deps(), ReplaySettings::default());
        let DrainOutcome::Completed(report) = replayer.trigger().await.unwrap() else {
            panic!("expected a completed pass")
        };
        assert_eq!(report.skipped_other_wallets, 1);
        assert_eq!(fx.bridge.execution_count(), 0);
        assert_eq!(fx.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_wallet_and_foreign_lock() {
        let fx = Fixture::new();
        fx.enqueue("1").await;
        let replayer = Replayer::new(fx.deps(), ReplaySettings::default());

        fx.lock.try_acquire("pending-bridge-drain", "elsewhere", 1_000, 120_000).await.unwrap();
        assert_eq!(replayer.trigger().await.unwrap(), DrainOutcome::LockedElsewhere);

        fx.wallet.set_address(None);
        assert_eq!(replayer.trigger().await.unwrap(), DrainOutcome::NoWallet);
        assert_eq!(fx.queue.len().await.unwrap(), 1);
    }
}
