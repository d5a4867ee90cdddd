// src/tools/async_support.rs
//! Async helpers shared by the submission and replay paths.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use crate::core::errors::BridgeError;

pub type AsyncResult<T> = Result<T, BridgeError>;

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub duration: Duration,
    pub operation_name: String,
}

impl TimeoutConfig {
    pub fn new(duration: Duration, operation_name: impl Into<String>) -> Self {
        Self { duration, operation_name: operation_name.into() }
    }

    /// Deadline for one whole bridge submission.
    pub fn submission(duration: Duration) -> Self {
        Self::new(duration, "bridge submission")
    }
}

pub struct AsyncExecutor;

impl AsyncExecutor {
    /// Elapsed deadlines surface as [`BridgeError::Timeout`], which callers treat
    /// like a connectivity failure.
    pub async fn execute_with_timeout<F, T>(future: F, config: TimeoutConfig) -> AsyncResult<T>
    where
        F: Future<Output = AsyncResult<T>>,
    {
        match timeout(config.duration, future).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation = %config.operation_name, timeout = ?config.duration, "Operation timed out");
                Err(BridgeError::Timeout(format!(
                    "Operation '{}' timed out after {:?}",
                    config.operation_name, config.duration
                )))
            }
        }
    }
}
