//! Bridge Submission Orchestrator: decides between immediate execution and
//! queueing, and owns the foreground replay triggers.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::blockchain::bridge::{BridgeIntent, PendingBridge, TransactionRecord};
use crate::blockchain::traits::{BridgeOutcome, OutcomeKind};
use crate::core::config::{RetentionConfig, SyncConfig, SyncSettings};
use crate::core::errors::BridgeError;
use crate::core::validation::addresses_match;
use crate::network::ConnectivityMonitor;
use crate::service::background_sync::BackgroundSyncCoordinator;
use crate::service::replay::{DrainOutcome, ReplayDeps, ReplaySettings, Replayer};
use crate::service::submission::submit_intent;
use crate::service::tracker::StepTracker;

/// Result of one `submit` call. Failures carry the reason for the UI.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Accepted by the bridge; the record is `pending`.
    Recorded(TransactionRecord),
    /// Offline: queued for replay.
    Enqueued(PendingBridge),
    Failed(BridgeError),
}

impl SubmitOutcome {
    pub fn error(&self) -> Option<&BridgeError> {
        match self {
            SubmitOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitReport {
    pub purged: u64,
    pub resumed: usize,
}

pub struct BridgeOrchestrator {
    deps: ReplayDeps,
    replayer: Arc<Replayer>,
    connectivity: Arc<ConnectivityMonitor>,
    background: BackgroundSyncCoordinator,
    sync: SyncSettings,
    retention: RetentionConfig,
}

impl BridgeOrchestrator {
    pub fn new(
        deps: ReplayDeps,
        connectivity: Arc<ConnectivityMonitor>,
        background: BackgroundSyncCoordinator,
        config: &SyncConfig,
    ) -> Self {
        let replayer = Arc::new(Replayer::new(deps.clone(), ReplaySettings::from(&config.sync)));
        Self {
            deps,
            replayer,
            connectivity,
            background,
            sync: config.sync.clone(),
            retention: config.retention.clone(),
        }
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn tracker(&self) -> &StepTracker {
        &self.deps.tracker
    }

    pub fn replayer(&self) -> &Arc<Replayer> {
        &self.replayer
    }

    /// Retention sweep and re-attachment to executions still in flight.
    pub async fn initialize(&self) -> InitReport {
        let purged = self.deps.records.purge_older_than(self.retention.max_age_ms()).await;
        if purged > 0 {
            info!(purged, "Expired bridge records removed");
        }
        let resumed = self.resume_tracking().await;
        InitReport { purged, resumed }
    }

    /// Follow every `pending`/`executing` record from its last known step.
    pub async fn resume_tracking(&self) -> usize {
        let mut resumed = 0;
        for record in self.deps.records.list_pending().await {
            match self.deps.bridge.resume_execution(&record.id, record.current_step_index).await {
                Ok(steps) => {
                    debug!(execution_id = %record.id, from_step = record.current_step_index, "Resuming step tracking");
                    self.deps.tracker.spawn(record, steps).await;
                    resumed += 1;
                }
                Err(e) => warn!(execution_id = %record.id, error = %e, "Cannot resume step tracking"),
            }
        }
        resumed
    }

    pub async fn submit(&self, intent: BridgeIntent) -> SubmitOutcome {
        let Some(connected) = self.deps.wallet.current_address() else {
            return SubmitOutcome::Failed(BridgeError::WalletNotConnected);
        };
        if !addresses_match(&connected, &intent.wallet_address) {
            return SubmitOutcome::Failed(BridgeError::Validation(
                "Bridge wallet is not the connected wallet".into(),
            ));
        }
        if let Err(e) = intent.validate() {
            return SubmitOutcome::Failed(e);
        }

        if !self.connectivity.is_online() {
            return self.enqueue(intent).await;
        }

        match submit_intent(
            self.deps.bridge.as_ref(),
            self.deps.wallet.as_ref(),
            self.deps.clock.as_ref(),
            &intent,
            self.sync.submit_timeout(),
        )
        .await
        {
            Ok(submission) => {
                if let Err(e) = self.deps.records.create(&submission.record).await {
                    error!(execution_id = %submission.record.id, error = %e, "Failed to record bridge");
                }
                self.deps.tracker.spawn(submission.record.clone(), submission.steps).await;
                self.notify(OutcomeKind::Pending, &intent, None).await;
                SubmitOutcome::Recorded(submission.record)
            }
            Err(e) => {
                warn!(error = %e, "Bridge submission failed");
                self.notify(OutcomeKind::Failure, &intent, Some(e.to_string())).await;
                SubmitOutcome::Failed(e)
            }
        }
    }

    async fn enqueue(&self, intent: BridgeIntent) -> SubmitOutcome {
        match self.deps.queue.enqueue(intent).await {
            Ok(entry) => {
                // Register only once the work is durable.
                if !self.background.register(&self.sync.tag).await {
                    info!(pending_id = %entry.id, "Bridge will replay when this context sees connectivity");
                }
                self.notify(OutcomeKind::Pending, &entry.intent, Some("Queued until online".into()))
                    .await;
                SubmitOutcome::Enqueued(entry)
            }
            Err(e) => {
                error!(error = %e, "Offline bridge could not be queued");
                SubmitOutcome::Failed(e)
            }
        }
    }

    pub async fn drain(&self) -> Result<DrainOutcome, BridgeError> {
        self.replayer.trigger().await
    }

    /// Drain once at startup when already online, then on every offline to
    /// online transition until `cancel` fires.
    pub fn spawn_connectivity_replay(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        let mut watch = self.connectivity.subscribe();
        tokio::spawn(async move {
            // Entries left over from an earlier session have no transition to wait for.
            if watch.is_online() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = this.replay_logged("startup") => {}
                }
            }
            loop {
                let online = tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = watch.changed() => match changed {
                        Some(online) => online,
                        None => break,
                    },
                };
                if online {
                    this.replay_logged("reconnect").await;
                }
            }
        })
    }

    async fn replay_logged(&self, trigger: &'static str) {
        match self.drain().await {
            Ok(outcome) => debug!(trigger, ?outcome, "Connectivity replay finished"),
            Err(e) => warn!(trigger, error = %e, "Connectivity replay failed"),
        }
    }

    pub async fn pending_for_current_wallet(&self) -> Result<Vec<PendingBridge>, BridgeError> {
        match self.deps.wallet.current_address() {
            Some(address) => self.deps.queue.list_for_wallet(&address).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn remove_pending(&self, id: &str) -> Result<bool, BridgeError> {
        self.deps.queue.remove(id).await
    }

    pub async fn clear_pending(&self) -> Result<u64, BridgeError> {
        self.deps.queue.clear().await
    }

    pub async fn history(&self) -> Vec<TransactionRecord> {
        self.deps.records.list().await
    }

    pub async fn record(&self, id: &str) -> Option<TransactionRecord> {
        self.deps.records.get(id).await
    }

    async fn notify(&self, kind: OutcomeKind, intent: &BridgeIntent, reason: Option<String>) {
        self.deps
            .notifier
            .on_bridge_outcome(
                kind,
                BridgeOutcome {
                    amount: intent.amount.clone(),
                    token: intent.source_token.symbol.clone(),
                    tx_hash: None,
                    reason,
                },
            )
            .await;
    }
}
