pub mod background_sync;
pub mod orchestrator;
pub mod replay;
mod submission;
pub mod tracker;

pub use background_sync::{
    BackgroundSyncCoordinator, BackgroundSyncPlatform, QueueSyncHandler, RetryPolicy, SyncHandler,
    TokioSyncPlatform, UnsupportedPlatform,
};
pub use orchestrator::{BridgeOrchestrator, InitReport, SubmitOutcome};
pub use replay::{drain_pass, DrainOutcome, DrainReport, ReplayDeps, ReplaySettings, Replayer};
pub use tracker::StepTracker;
