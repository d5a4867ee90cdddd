//! Folds an execution's step stream into its transaction record.

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::blockchain::bridge::steps::fold_event;
use crate::blockchain::bridge::{StepEvent, TransactionRecord};
use crate::blockchain::traits::{BridgeOutcome, NotificationDispatcher, OutcomeKind, StepStream};
use crate::core::clock::Clock;
use crate::core::errors::BridgeError;
use crate::storage::TransactionStore;

pub struct StepTracker {
    records: Arc<dyn TransactionStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    tasks: Mutex<JoinSet<()>>,
}

impl StepTracker {
    pub fn new(
        records: Arc<dyn TransactionStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { records, notifier, clock, tasks: Mutex::new(JoinSet::new()) }
    }

    /// Follow `steps` in the background, starting from `record` as last known state.
    pub async fn spawn(&self, record: TransactionRecord, steps: StepStream) {
        let records = self.records.clone();
        let notifier = self.notifier.clone();
        let clock = self.clock.clone();
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(follow(records, notifier, clock, record, steps));
    }

    /// Waits until every followed stream has ended.
    pub async fn wait_idle(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "Step tracking task aborted");
            }
        }
    }

    pub async fn active(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

async fn follow(
    records: Arc<dyn TransactionStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    mut current: TransactionRecord,
    mut steps: StepStream,
) {
    let id = current.id.clone();
    debug!(execution_id = %id, "Tracking bridge steps");

    while let Some(event) = steps.next().await {
        let patch = fold_event(&current, &event);
        if !patch.is_empty() {
            match records.update(&id, &patch).await {
                Ok(next) => current = next,
                // History is best-effort; keep the local view moving so the outcome is still reported.
                Err(BridgeError::PersistenceUnavailable(_)) | Err(BridgeError::NotFound(_)) => {
                    match current.apply(&patch, clock.now_ms()) {
                        Ok(next) => current = next,
                        Err(e) => warn!(execution_id = %id, error = %e, "Dropping step event"),
                    }
                }
                Err(e) => warn!(execution_id = %id, error = %e, "Dropping step event"),
            }
        }

        match event {
            StepEvent::Completed { received_amount, .. } => {
                info!(execution_id = %id, received = %received_amount, "Bridge completed");
                notifier
                    .on_bridge_outcome(
                        OutcomeKind::Success,
                        BridgeOutcome {
                            amount: received_amount,
                            token: current.dest_token.symbol.clone(),
                            tx_hash: current.source_tx_hash.clone(),
                            reason: None,
                        },
                    )
                    .await;
                break;
            }
            StepEvent::Failed { message, .. } => {
                warn!(execution_id = %id, reason = %message, "Bridge failed");
                notifier
                    .on_bridge_outcome(
                        OutcomeKind::Failure,
                        BridgeOutcome {
                            amount: current.amount.clone(),
                            token: current.source_token.symbol.clone(),
                            tx_hash: current.source_tx_hash.clone(),
                            reason: Some(message),
                        },
                    )
                    .await;
                break;
            }
            StepEvent::Step { .. } => {}
        }
    }
}
