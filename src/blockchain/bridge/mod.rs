// src/blockchain/bridge/mod.rs

pub mod mock;
pub mod pending;
pub mod steps;

use serde::{Deserialize, Serialize};

use crate::blockchain::traits::Quote;
use crate::core::errors::BridgeError;

pub use pending::{BridgeIntent, PendingBridge, TokenRef};
pub use steps::{BridgeStep, StepEvent, StepState};

/// Lifecycle of a bridge attempt. Ordering follows the allowed direction of travel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl BridgeStatus {
    fn rank(self) -> u8 {
        match self {
            BridgeStatus::Pending => 0,
            BridgeStatus::Executing => 1,
            BridgeStatus::Completed | BridgeStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BridgeStatus::Completed | BridgeStatus::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        !self.is_terminal()
    }

    /// Forward moves only; staying put is allowed, leaving a terminal state is not.
    pub fn can_transition_to(self, next: BridgeStatus) -> bool {
        if self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BridgeStatus::Pending => "pending",
            BridgeStatus::Executing => "executing",
            BridgeStatus::Completed => "completed",
            BridgeStatus::Failed => "failed",
        }
    }
}

/// Token descriptor as reported by the bridging collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    SwitchChain,
    AddFunds,
    ReduceAmount,
    ContactSupport,
}

/// Structured failure attached to a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: String,
    pub recoverable: bool,
    pub recovery_action: Option<RecoveryAction>,
    pub user_message: String,
}

/// One bridge attempt, keyed by the collaborator's execution id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRecord {
    pub id: String,
    pub source_chain_id: u64,
    pub source_chain_name: String,
    pub dest_chain_id: u64,
    pub dest_chain_name: String,
    pub source_token: TokenInfo,
    pub dest_token: TokenInfo,
    pub amount: String,
    pub expected_received: String,
    pub received_amount: Option<String>,
    pub status: BridgeStatus,
    pub steps: Vec<BridgeStep>,
    pub current_step_index: usize,
    pub progress: u8,
    pub created_at: i64,
    pub updated_at: i64,
    pub error_message: Option<String>,
    pub error_detail: Option<ErrorDetail>,
    pub source_tx_hash: Option<String>,
}

/// Partial update. `id` and `created_at` are deliberately absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPatch {
    pub status: Option<BridgeStatus>,
    pub steps: Option<Vec<BridgeStep>>,
    pub current_step_index: Option<usize>,
    pub progress: Option<u8>,
    pub received_amount: Option<String>,
    pub error_message: Option<String>,
    pub error_detail: Option<ErrorDetail>,
    pub source_tx_hash: Option<String>,
}

impl TransactionPatch {
    pub fn is_empty(&self) -> bool {
        self == &TransactionPatch::default()
    }
}

impl TransactionRecord {
    /// Fresh `pending` record for an execution the collaborator just accepted.
    pub fn accepted(execution_id: &str, quote: &Quote, now_ms: i64) -> Self {
        Self {
            id: execution_id.to_string(),
            source_chain_id: quote.source_chain_id,
            source_chain_name: quote.source_chain_name.clone(),
            dest_chain_id: quote.dest_chain_id,
            dest_chain_name: quote.dest_chain_name.clone(),
            source_token: quote.source_token.clone(),
            dest_token: quote.dest_token.clone(),
            amount: quote.amount.clone(),
            expected_received: quote.expected_received.clone(),
            received_amount: None,
            status: BridgeStatus::Pending,
            steps: Vec::new(),
            current_step_index: 0,
            progress: 0,
            created_at: now_ms,
            updated_at: now_ms,
            error_message: None,
            error_detail: None,
            source_tx_hash: None,
        }
    }

    /// Merge `patch` into a copy of this record, enforcing the lifecycle invariants.
    pub fn apply(&self, patch: &TransactionPatch, now_ms: i64) -> Result<Self, BridgeError> {
        let mut next = self.clone();

        if let Some(status) = patch.status {
            if !self.status.can_transition_to(status) {
                return Err(BridgeError::InvalidTransition(format!(
                    "{}: {} -> {}",
                    self.id,
                    self.status.as_str(),
                    status.as_str()
                )));
            }
            next.status = status;
        }

        if let Some(progress) = patch.progress {
            if progress > 100 {
                return Err(BridgeError::InvalidTransition(format!(
                    "{}: progress {} out of range",
                    self.id, progress
                )));
            }
            if self.status.is_in_flight() && progress < self.progress {
                return Err(BridgeError::InvalidTransition(format!(
                    "{}: progress regressed {} -> {}",
                    self.id, self.progress, progress
                )));
            }
            next.progress = progress;
        }

        if let Some(steps) = &patch.steps {
            next.steps = steps.clone();
        }
        if let Some(index) = patch.current_step_index {
            next.current_step_index = index;
        }
        if let Some(received) = &patch.received_amount {
            next.received_amount = Some(received.clone());
        }
        if let Some(message) = &patch.error_message {
            next.error_message = Some(message.clone());
        }
        if let Some(detail) = &patch.error_detail {
            next.error_detail = Some(detail.clone());
        }
        if let Some(hash) = &patch.source_tx_hash {
            next.source_tx_hash = Some(hash.clone());
        }

        if next.received_amount.is_some() && next.status != BridgeStatus::Completed {
            return Err(BridgeError::InvalidTransition(format!(
                "{}: received amount set while {}",
                self.id,
                next.status.as_str()
            )));
        }

        next.updated_at = now_ms.max(self.created_at);
        Ok(next)
    }
}
