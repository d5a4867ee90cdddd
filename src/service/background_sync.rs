//! Background Sync Coordinator.
//!
//! Registration only carries the signal "go check the queue"; the queue must
//! already hold the work. When the platform cannot run background work the
//! foreground connectivity listener remains the replay trigger.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::SyncSettings;
use crate::core::errors::BridgeError;
use crate::network::ConnectivityWatch;
use crate::service::replay::{DrainOutcome, Replayer};

/// Host facility able to wake a background context once connectivity returns.
#[async_trait]
pub trait BackgroundSyncPlatform: Send + Sync {
    fn is_supported(&self) -> bool;
    async fn register(&self, tag: &str) -> Result<(), BridgeError>;
}

/// Work run in the background context for a registered tag. An `Err` means
/// the wake did not finish its work and the tag is retried.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn on_sync(&self, tag: &str) -> Result<(), BridgeError>;
}

/// How often a failed background wake is retried before the tag is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    /// Doubles per attempt, starting at `initial_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for RetryPolicy {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            max_attempts: settings.background_retry_limit,
            initial_delay: Duration::from_secs(settings.background_retry_delay_secs),
        }
    }
}

pub struct BackgroundSyncCoordinator {
    platform: Arc<dyn BackgroundSyncPlatform>,
}

impl BackgroundSyncCoordinator {
    pub fn new(platform: Arc<dyn BackgroundSyncPlatform>) -> Self {
        Self { platform }
    }

    pub fn unsupported() -> Self {
        Self::new(Arc::new(UnsupportedPlatform))
    }

    pub fn is_supported(&self) -> bool {
        self.platform.is_supported()
    }

    /// `false` when the facility is missing or refuses. Never fatal.
    pub async fn register(&self, tag: &str) -> bool {
        if !self.platform.is_supported() {
            debug!(%tag, "Background sync unsupported, relying on foreground replay");
            return false;
        }
        match self.platform.register(tag).await {
            Ok(()) => {
                debug!(%tag, "Background sync registered");
                true
            }
            Err(e) => {
                warn!(%tag, error = %e, "Background sync registration failed");
                false
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedPlatform;

#[async_trait]
impl BackgroundSyncPlatform for UnsupportedPlatform {
    fn is_supported(&self) -> bool {
        false
    }

    async fn register(&self, _tag: &str) -> Result<(), BridgeError> {
        Err(BridgeError::CapabilityUnsupported("background sync".into()))
    }
}

/// Background execution context on a dedicated tokio task. Each registration
/// fires the handler the next time the connectivity watch reports online. A
/// handler error puts the tag back and fires again after a backoff, up to
/// `RetryPolicy::max_attempts`. Registering a tag that is already waiting is a no-op.
pub struct TokioSyncPlatform {
    registered: Mutex<BTreeSet<String>>,
    wake: Notify,
    cancel: CancellationToken,
    retry: RetryPolicy,
}

impl TokioSyncPlatform {
    pub fn spawn(
        connectivity: ConnectivityWatch,
        handler: Arc<dyn SyncHandler>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        Self::spawn_with_retry(connectivity, handler, cancel, RetryPolicy::default())
    }

    pub fn spawn_with_retry(
        connectivity: ConnectivityWatch,
        handler: Arc<dyn SyncHandler>,
        cancel: CancellationToken,
        retry: RetryPolicy,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let platform = Arc::new(Self {
            registered: Mutex::new(BTreeSet::new()),
            wake: Notify::new(),
            cancel,
            retry,
        });
        let worker = tokio::spawn(run_worker(platform.clone(), connectivity, handler));
        (platform, worker)
    }

    pub fn registered_tags(&self) -> Vec<String> {
        self.registered.lock().iter().cloned().collect()
    }

    fn take_registered(&self) -> Vec<String> {
        std::mem::take(&mut *self.registered.lock()).into_iter().collect()
    }
}

#[async_trait]
impl BackgroundSyncPlatform for TokioSyncPlatform {
    fn is_supported(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    async fn register(&self, tag: &str) -> Result<(), BridgeError> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::CapabilityUnsupported("background context stopped".into()));
        }
        self.registered.lock().insert(tag.to_string());
        self.wake.notify_one();
        Ok(())
    }
}

async fn run_worker(
    platform: Arc<TokioSyncPlatform>,
    mut connectivity: ConnectivityWatch,
    handler: Arc<dyn SyncHandler>,
) {
    info!("Background sync context started");
    let mut failures: HashMap<String, u32> = HashMap::new();
    loop {
        tokio::select! {
            _ = platform.cancel.cancelled() => break,
            _ = platform.wake.notified() => {}
        }

        tokio::select! {
            _ = platform.cancel.cancelled() => break,
            online = connectivity.wait_until_online() => {
                if !online {
                    break;
                }
            }
        }

        let mut backoff: Option<Duration> = None;
        for tag in platform.take_registered() {
            debug!(%tag, "Background sync firing");
            match handler.on_sync(&tag).await {
                Ok(()) => {
                    failures.remove(&tag);
                }
                Err(e) => {
                    let attempt = failures.entry(tag.clone()).or_insert(0);
                    *attempt += 1;
                    if *attempt >= platform.retry.max_attempts {
                        warn!(%tag, attempts = *attempt, error = %e, "Background sync giving up");
                        failures.remove(&tag);
                        continue;
                    }
                    let delay = platform.retry.delay(*attempt);
                    warn!(%tag, attempt = *attempt, retry_in = ?delay, error = %e, "Background sync failed");
                    platform.registered.lock().insert(tag);
                    backoff = Some(backoff.map_or(delay, |d| d.max(delay)));
                }
            }
        }

        if let Some(delay) = backoff {
            tokio::select! {
                _ = platform.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => platform.wake.notify_one(),
            }
        }
    }
    info!("Background sync context stopped");
}

/// Background handler that drains the pending queue through its own replayer.
pub struct QueueSyncHandler {
    tag: String,
    replayer: Arc<Replayer>,
}

impl QueueSyncHandler {
    pub fn new(tag: impl Into<String>, replayer: Arc<Replayer>) -> Self {
        Self { tag: tag.into(), replayer }
    }
}

#[async_trait]
impl SyncHandler for QueueSyncHandler {
    async fn on_sync(&self, tag: &str) -> Result<(), BridgeError> {
        if tag != self.tag {
            debug!(%tag, "Ignoring unrelated sync tag");
            return Ok(());
        }
        match self.replayer.trigger().await? {
            DrainOutcome::Completed(report) => {
                info!(submitted = report.submitted, retained = report.retained, "Background drain finished");
                if report.stopped_on_connectivity {
                    return Err(BridgeError::Connectivity("background drain stopped early".into()));
                }
                if report.lease_lost {
                    return Err(BridgeError::Conflict("drain lock lost mid-pass".into()));
                }
                if report.retained > 0 {
                    return Err(BridgeError::rejected(format!(
                        "{} queued bridges still waiting",
                        report.retained
                    )));
                }
                Ok(())
            }
            DrainOutcome::LockedElsewhere => {
                Err(BridgeError::Conflict("another context holds the drain lock".into()))
            }
            other => {
                debug!(outcome = ?other, "Background drain skipped");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ConnectivityMonitor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
        fired: Notify,
    }

    #[async_trait]
    impl SyncHandler for CountingHandler {
        async fn on_sync(&self, _tag: &str) -> Result<(), BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.fired.notify_one();
            Ok(())
        }
    }

    /// Fails the first `failures` wakes, then succeeds.
    struct FlakyHandler {
        failures: usize,
        calls: AtomicUsize,
        fired: Notify,
    }

    #[async_trait]
    impl SyncHandler for FlakyHandler {
        async fn on_sync(&self, _tag: &str) -> Result<(), BridgeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.fired.notify_one();
            if call < self.failures {
                Err(BridgeError::Connectivity("gateway unreachable".into()))
            } else {
                Ok(())
            }
        }
    }

    fn flaky(failures: usize) -> Arc<FlakyHandler> {
        Arc::new(FlakyHandler { failures, calls: AtomicUsize::new(0), fired: Notify::new() })
    }

    #[test]
    fn test_retry_delay_doubles() {
        let policy = RetryPolicy { max_attempts: 5, initial_delay: Duration::from_secs(2) };
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(RetryPolicy::default().max_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_wake_is_retried() {
        let monitor = ConnectivityMonitor::new(true);
        let handler = flaky(1);
        let cancel = CancellationToken::new();
        let policy = RetryPolicy { max_attempts: 3, initial_delay: Duration::from_secs(10) };
        let (platform, worker) =
            TokioSyncPlatform::spawn_with_retry(monitor.subscribe(), handler.clone(), cancel.clone(), policy);

        platform.register("bridge-queue-sync").await.unwrap();
        handler.fired.notified().await;
        tokio::task::yield_now().await;
        assert_eq!(platform.registered_tags(), vec!["bridge-queue-sync".to_string()]);

        handler.fired.notified().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(platform.registered_tags().is_empty());

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_at_the_limit() {
        let monitor = ConnectivityMonitor::new(true);
        let handler = flaky(usize::MAX);
        let cancel = CancellationToken::new();
        let policy = RetryPolicy { max_attempts: 2, initial_delay: Duration::from_secs(1) };
        let (platform, worker) =
            TokioSyncPlatform::spawn_with_retry(monitor.subscribe(), handler.clone(), cancel.clone(), policy);

        platform.register("bridge-queue-sync").await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(platform.registered_tags().is_empty());

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_registration_is_not_fatal() {
        let coordinator = BackgroundSyncCoordinator::unsupported();
        assert!(!coordinator.is_supported());
        assert!(!coordinator.register("bridge-queue-sync").await);
    }

    #[tokio::test]
    async fn test_registration_fires_once_when_online() {
        let monitor = ConnectivityMonitor::new(false);
        let handler = Arc::new(CountingHandler::default());
        let cancel = CancellationToken::new();
        let (platform, worker) = TokioSyncPlatform::spawn(monitor.subscribe(), handler.clone(), cancel.clone());
        let coordinator = BackgroundSyncCoordinator::new(platform.clone());

        assert!(coordinator.register("bridge-queue-sync").await);
        assert!(coordinator.register("bridge-queue-sync").await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        monitor.set_online(true);
        tokio::time::timeout(Duration::from_secs(5), handler.fired.notified()).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(platform.registered_tags().is_empty());

        cancel.cancel();
        worker.await.unwrap();
        assert!(!coordinator.register("bridge-queue-sync").await);
    }
}
