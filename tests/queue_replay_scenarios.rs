mod util;

use bridge_sync::blockchain::bridge::mock::{sample_intent, ScriptedResponse, WALLET_B};
use bridge_sync::blockchain::bridge::BridgeStatus;
use bridge_sync::blockchain::traits::OutcomeKind;
use bridge_sync::service::{DrainOutcome, DrainReport, SubmitOutcome};
use bridge_sync::storage::{PendingQueue, TransactionStore};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use util::{eventually, Context};

fn completed(outcome: DrainOutcome) -> DrainReport {
    match outcome {
        DrainOutcome::Completed(report) => report,
        other => panic!("expected a completed drain pass, got {:?}", other),
    }
}

#[tokio::test]
async fn offline_enqueue_then_online_replay() {
    let ctx = Context::in_memory().await;
    ctx.connectivity.set_online(false);
    let orchestrator = ctx.orchestrator();
    let cancel = CancellationToken::new();
    let listener = orchestrator.spawn_connectivity_replay(cancel.clone());

    let entry = match orchestrator.submit(sample_intent("10.5")).await {
        SubmitOutcome::Enqueued(entry) => entry,
        other => panic!("expected the bridge to be queued, got {:?}", other),
    };
    assert_eq!(entry.intent.amount, "10.5");
    assert_eq!(entry.intent.source_chain_id, 42161);
    assert_eq!(entry.intent.source_token.symbol, "USDC");
    assert_eq!(ctx.queue.len().await.unwrap(), 1);
    assert_eq!(ctx.bridge.execution_count(), 0);
    assert_eq!(ctx.notifier.count(OutcomeKind::Pending), 1);

    ctx.connectivity.set_online(true);
    eventually(|| async { ctx.queue.len().await.unwrap() == 0 }).await;

    let records = ctx.records.list().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, BridgeStatus::Pending);
    assert_eq!(records[0].amount, "10.5");
    assert_eq!(records[0].source_chain_id, 42161);

    cancel.cancel();
    listener.await.unwrap();
}

#[tokio::test]
async fn wallet_mismatch_entry_is_skipped() {
    let ctx = Context::in_memory().await;
    ctx.connectivity.set_online(false);
    let orchestrator = ctx.orchestrator();
    assert!(matches!(orchestrator.submit(sample_intent("10.5")).await, SubmitOutcome::Enqueued(_)));

    ctx.wallet.set_address(Some(WALLET_B));
    ctx.connectivity.set_online(true);
    let report = completed(orchestrator.drain().await.unwrap());

    assert_eq!(report.submitted, 0);
    assert_eq!(report.skipped_other_wallets, 1);
    assert_eq!(ctx.bridge.execution_count(), 0);
    assert_eq!(ctx.queue.len().await.unwrap(), 1);
    assert!(ctx.records.list().await.is_empty());
    assert!(orchestrator.pending_for_current_wallet().await.unwrap().is_empty());
}

#[tokio::test]
async fn connectivity_failure_stops_the_pass() {
    let ctx = Context::in_memory().await;
    ctx.queue.enqueue(sample_intent("1")).await.unwrap();
    ctx.clock.advance(1);
    ctx.queue.enqueue(sample_intent("2")).await.unwrap();
    ctx.bridge.push(ScriptedResponse::Connectivity("gateway timeout".into()));

    let report = completed(ctx.orchestrator().drain().await.unwrap());

    assert!(report.stopped_on_connectivity);
    assert_eq!(report.submitted, 0);
    // The second entry would have been accepted had it been attempted.
    assert_eq!(ctx.bridge.execution_count(), 0);
    assert_eq!(ctx.queue.len().await.unwrap(), 2);
    assert!(ctx.records.list().await.is_empty());
}

#[tokio::test]
async fn permanent_rejection_does_not_block_siblings() {
    let ctx = Context::in_memory().await;
    ctx.bridge.set_minimum("5");
    ctx.queue.enqueue(sample_intent("1")).await.unwrap();
    ctx.clock.advance(1);
    ctx.queue.enqueue(sample_intent("10")).await.unwrap();

    let report = completed(ctx.orchestrator().drain().await.unwrap());

    assert_eq!(report.rejected, 1);
    assert_eq!(report.submitted, 1);
    assert_eq!(ctx.queue.len().await.unwrap(), 0);

    let executed: Vec<String> = ctx.bridge.executed().into_iter().map(|q| q.amount).collect();
    assert_eq!(executed, vec!["10".to_string()]);
    let records = ctx.records.list().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].amount, "10");

    let failures: Vec<_> = ctx
        .notifier
        .outcomes()
        .into_iter()
        .filter(|(kind, _)| *kind == OutcomeKind::Failure)
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1.amount, "1");
    assert!(failures[0].1.reason.as_deref().unwrap_or_default().contains("below minimum"));
}

#[tokio::test]
async fn entry_removed_by_user_mid_pass_counts_as_handled() {
    let ctx = Context::in_memory().await;
    let first = ctx.queue.enqueue(sample_intent("1")).await.unwrap();
    ctx.clock.advance(1);
    let second = ctx.queue.enqueue(sample_intent("2")).await.unwrap();
    ctx.bridge.hold_executions();

    let orchestrator = ctx.orchestrator();
    let drain = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.drain().await }
    });
    eventually(|| async { ctx.bridge.in_flight() == 1 }).await;

    assert!(orchestrator.remove_pending(&second.id).await.unwrap());
    assert!(!orchestrator.remove_pending(&second.id).await.unwrap());
    ctx.bridge.release(1);

    let report = completed(drain.await.unwrap().unwrap());
    assert_eq!(report.submitted, 1);
    assert_eq!(report.already_handled, 1);
    assert_eq!(ctx.bridge.executed()[0].amount, "1");
    assert!(ctx.queue.get(&first.id).await.unwrap().is_none());
    assert_eq!(ctx.records.list().await.len(), 1);
}

#[tokio::test]
async fn queue_left_from_earlier_session_replays_when_started_online() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("bridge.db").display());

    let earlier = Context::open(&url).await;
    earlier.connectivity.set_online(false);
    assert!(matches!(earlier.orchestrator().submit(sample_intent("3")).await, SubmitOutcome::Enqueued(_)));
    earlier.storage.close().await;

    // Restart with the network already up: no offline to online transition will ever arrive.
    let ctx = Context::open(&url).await;
    assert!(ctx.connectivity.is_online());
    assert_eq!(ctx.queue.len().await.unwrap(), 1);

    let orchestrator = ctx.orchestrator();
    orchestrator.initialize().await;
    let cancel = CancellationToken::new();
    let listener = orchestrator.spawn_connectivity_replay(cancel.clone());

    eventually(|| async { ctx.queue.len().await.unwrap() == 0 }).await;
    assert_eq!(ctx.bridge.execution_count(), 1);
    let records = ctx.records.list().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].amount, "3");

    cancel.cancel();
    listener.await.unwrap();
}
