use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::blockchain::bridge::{StepEvent, TokenInfo, TokenRef};
use crate::core::errors::BridgeError;

/// A priced, time-bounded route proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub id: String,
    pub source_chain_id: u64,
    pub source_chain_name: String,
    pub dest_chain_id: u64,
    pub dest_chain_name: String,
    pub source_token: TokenInfo,
    pub dest_token: TokenInfo,
    pub amount: String,
    pub expected_received: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceValidation {
    pub sufficient: bool,
    pub balance: String,
    pub required: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub wallet_address: String,
    pub auto_deposit: bool,
}

/// Finite, restartable sequence of step events for one execution.
pub type StepStream = BoxStream<'static, StepEvent>;

pub struct Execution {
    pub execution_id: String,
    pub steps: StepStream,
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution").field("execution_id", &self.execution_id).finish()
    }
}

/// Quoting and execution engine. Errors must be classified: connectivity
/// problems as `Connectivity`/`Timeout`, refusals as `SubmissionRejected`.
#[async_trait]
pub trait BridgeClient: Send + Sync {
    async fn get_quote(
        &self,
        source_chain_id: u64,
        source_token: &TokenRef,
        dest_token: &TokenRef,
        amount: &str,
    ) -> Result<Quote, BridgeError>;

    async fn validate_balance(
        &self,
        quote: &Quote,
        address: &str,
    ) -> Result<BalanceValidation, BridgeError>;

    async fn execute_bridge(
        &self,
        quote: &Quote,
        options: &ExecuteOptions,
    ) -> Result<Execution, BridgeError>;

    /// Re-attach to an execution, yielding events from `from_step` onwards.
    async fn resume_execution(
        &self,
        execution_id: &str,
        from_step: usize,
    ) -> Result<StepStream, BridgeError>;
}

/// Result of probing the wallet once for chain switching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainSwitchCapability {
    Supported,
    Unsupported,
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    fn current_address(&self) -> Option<String>;
    fn is_connected(&self) -> bool;
    fn current_chain_id(&self) -> Option<u64>;
    fn chain_switch_capability(&self) -> ChainSwitchCapability;
    async fn sign_and_switch_chain(&self, target_chain_id: u64) -> Result<(), BridgeError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Success,
    Failure,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeOutcome {
    pub amount: String,
    pub token: String,
    pub tx_hash: Option<String>,
    pub reason: Option<String>,
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn on_bridge_outcome(&self, kind: OutcomeKind, outcome: BridgeOutcome);
}
