//! Step-status events from the bridging collaborator and how they fold into a
//! [`TransactionRecord`].

use serde::{Deserialize, Serialize};

use super::{BridgeStatus, ErrorDetail, TransactionPatch, TransactionRecord};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Waiting,
    Active,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeStep {
    pub name: String,
    pub state: StepState,
    pub tx_hash: Option<String>,
}

/// One item of the finite step stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    Step { index: usize, total: usize, step: BridgeStep },
    Completed { received_amount: String, tx_hash: Option<String> },
    Failed { message: String, detail: Option<ErrorDetail> },
}

impl StepEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepEvent::Step { .. })
    }
}

/// Patch that moves `record` forward by `event`. Never regresses progress, so
/// replaying an already-seen prefix of the stream is harmless.
pub fn fold_event(record: &TransactionRecord, event: &StepEvent) -> TransactionPatch {
    match event {
        StepEvent::Step { index, total, step } => {
            let mut steps = record.steps.clone();
            let total = (*total).max(index + 1);
            if steps.len() < total {
                steps.resize(
                    total,
                    BridgeStep { name: String::new(), state: StepState::Waiting, tx_hash: None },
                );
            }
            steps[*index] = step.clone();

            let done = steps.iter().filter(|s| s.state == StepState::Done).count();
            // 100 is reserved for the terminal Completed event.
            let computed = ((done * 100) / total).min(99) as u8;

            TransactionPatch {
                status: (record.status == BridgeStatus::Pending).then_some(BridgeStatus::Executing),
                progress: Some(computed.max(record.progress)),
                current_step_index: Some(*index),
                source_tx_hash: if record.source_tx_hash.is_none() {
                    step.tx_hash.clone()
                } else {
                    None
                },
                steps: Some(steps),
                ..Default::default()
            }
        }
        StepEvent::Completed { received_amount, tx_hash } => TransactionPatch {
            status: Some(BridgeStatus::Completed),
            progress: Some(100),
            received_amount: Some(received_amount.clone()),
            source_tx_hash: if record.source_tx_hash.is_none() { tx_hash.clone() } else { None },
            ..Default::default()
        },
        StepEvent::Failed { message, detail } => TransactionPatch {
            status: Some(BridgeStatus::Failed),
            error_message: Some(message.clone()),
            error_detail: detail.clone(),
            ..Default::default()
        },
    }
}
