//! Error types shared by the stores, the replay path and the orchestrator.

use thiserror::Error;

/// Errors surfaced by bridge-sync operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// Underlying storage disabled, locked or otherwise inaccessible.
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate id on create. Collaborator-assigned ids make this a defect.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A record update would break a lifecycle invariant.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// The bridging collaborator refused the request.
    #[error("Submission rejected: {reason}")]
    SubmissionRejected { reason: String, permanent: bool },

    #[error("Connectivity failure: {0}")]
    Connectivity(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Capability unsupported: {0}")]
    CapabilityUnsupported(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Wallet not connected")]
    WalletNotConnected,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// Network errors and hangs. These stop a drain pass for the wallet.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, BridgeError::Connectivity(_) | BridgeError::Timeout(_))
    }

    /// Entry-specific failures that will not succeed on retry.
    pub fn is_permanent(&self) -> bool {
        match self {
            BridgeError::SubmissionRejected { permanent, .. } => *permanent,
            BridgeError::Validation(_) => true,
            _ => false,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        BridgeError::SubmissionRejected { reason: reason.into(), permanent: false }
    }

    pub fn rejected_permanently(reason: impl Into<String>) -> Self {
        BridgeError::SubmissionRejected { reason: reason.into(), permanent: true }
    }
}

impl From<sqlx::Error> for BridgeError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => BridgeError::NotFound("row not found".to_string()),
            other => BridgeError::PersistenceUnavailable(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}
