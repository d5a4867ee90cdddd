// filepath: src/blockchain/bridge/mock.rs
//! Scripted stand-ins for the wallet, bridging and notification collaborators.
//! Used by the test suites and by embedders wiring a dry-run mode.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

use crate::blockchain::bridge::{BridgeIntent, StepEvent, TokenInfo, TokenRef};
use crate::blockchain::traits::{
    BalanceValidation, BridgeClient, BridgeOutcome, ChainSwitchCapability, ExecuteOptions,
    Execution, NotificationDispatcher, OutcomeKind, Quote, StepStream, WalletProvider,
};
use crate::core::errors::BridgeError;

pub const WALLET_A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const WALLET_B: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const USDC_ARBITRUM: &str = "0xaf88d065e77c8cc2239327c5edb3a432268e5831";
pub const USDC_DEST: &str = "0x2000000000000000000000000000000000000000";
pub const DEST_CHAIN_ID: u64 = 999;

/// 10.5-style USDC bridge from Arbitrum for [`WALLET_A`].
pub fn sample_intent(amount: &str) -> BridgeIntent {
    BridgeIntent {
        wallet_address: WALLET_A.to_string(),
        source_chain_id: 42161,
        source_chain_name: "Arbitrum".to_string(),
        source_token: TokenRef::new(USDC_ARBITRUM, "USDC"),
        amount: amount.to_string(),
        dest_token: TokenRef::new(USDC_DEST, "USDC"),
        auto_deposit: true,
    }
}

pub fn sample_quote(amount: &str) -> Quote {
    quote_for(
        42161,
        &TokenRef::new(USDC_ARBITRUM, "USDC"),
        &TokenRef::new(USDC_DEST, "USDC"),
        amount,
    )
}

fn quote_for(source_chain_id: u64, source: &TokenRef, dest: &TokenRef, amount: &str) -> Quote {
    Quote {
        id: format!("quote-{}-{}", source_chain_id, amount),
        source_chain_id,
        source_chain_name: chain_name(source_chain_id).to_string(),
        dest_chain_id: DEST_CHAIN_ID,
        dest_chain_name: chain_name(DEST_CHAIN_ID).to_string(),
        source_token: TokenInfo {
            address: source.address.clone(),
            symbol: source.symbol.clone(),
            decimals: 6,
            chain_id: source_chain_id,
        },
        dest_token: TokenInfo {
            address: dest.address.clone(),
            symbol: dest.symbol.clone(),
            decimals: 6,
            chain_id: DEST_CHAIN_ID,
        },
        amount: amount.to_string(),
        expected_received: amount.to_string(),
        expires_at: chrono::Utc::now().timestamp_millis() + 60_000,
    }
}

fn chain_name(chain_id: u64) -> &'static str {
    match chain_id {
        1 => "Ethereum",
        10 => "Optimism",
        137 => "Polygon",
        8453 => "Base",
        42161 => "Arbitrum",
        DEST_CHAIN_ID => "HyperEVM",
        _ => "Unknown",
    }
}

/// What the next `execute_bridge` call does.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Accept { events: Vec<StepEvent> },
    Reject { reason: String, permanent: bool },
    Connectivity(String),
    /// Never resolves. Exercises submission timeouts.
    Hang,
}

/// Bridge collaborator driven by a queue of scripted responses. With an empty
/// script every execution is accepted without step events.
pub struct ScriptedBridge {
    script: Mutex<VecDeque<ScriptedResponse>>,
    minimum: Mutex<Option<Decimal>>,
    balance: Mutex<String>,
    executed: Mutex<Vec<Quote>>,
    resumable: Mutex<HashMap<String, Vec<StepEvent>>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_id: AtomicU64,
}

impl Default for ScriptedBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBridge {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            minimum: Mutex::new(None),
            balance: Mutex::new("1000000".to_string()),
            executed: Mutex::new(Vec::new()),
            resumable: Mutex::new(HashMap::new()),
            gate: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn push(&self, response: ScriptedResponse) -> &Self {
        self.script.lock().push_back(response);
        self
    }

    /// Quotes below `minimum` are refused permanently.
    pub fn set_minimum(&self, minimum: &str) {
        *self.minimum.lock() = Decimal::from_str(minimum).ok();
    }

    pub fn set_balance(&self, balance: &str) {
        *self.balance.lock() = balance.to_string();
    }

    /// Events served by `resume_execution` for `execution_id`.
    pub fn set_resumable(&self, execution_id: &str, events: Vec<StepEvent>) {
        self.resumable.lock().insert(execution_id.to_string(), events);
    }

    /// Block every `execute_bridge` call until [`Self::release`] hands out permits.
    pub fn hold_executions(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = self.gate.lock().as_ref() {
            gate.add_permits(permits);
        }
    }

    pub fn executed(&self) -> Vec<Quote> {
        self.executed.lock().clone()
    }

    pub fn execution_count(&self) -> usize {
        self.executed.lock().len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn run_execute(&self, quote: &Quote) -> Result<Execution, BridgeError> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| BridgeError::Connectivity("execution gate closed".into()))?;
            permit.forget();
        }

        let response = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(ScriptedResponse::Accept { events: Vec::new() });

        match response {
            ScriptedResponse::Accept { events } => {
                let id = format!("exec-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
                self.executed.lock().push(quote.clone());
                info!(execution_id = %id, amount = %quote.amount, "[SIMULATED] bridge accepted");
                Ok(Execution { execution_id: id, steps: futures::stream::iter(events).boxed() })
            }
            ScriptedResponse::Reject { reason, permanent } => {
                Err(BridgeError::SubmissionRejected { reason, permanent })
            }
            ScriptedResponse::Connectivity(reason) => Err(BridgeError::Connectivity(reason)),
            ScriptedResponse::Hang => std::future::pending::<Result<Execution, BridgeError>>().await,
        }
    }
}

#[async_trait]
impl BridgeClient for ScriptedBridge {
    async fn get_quote(
        &self,
        source_chain_id: u64,
        source_token: &TokenRef,
        dest_token: &TokenRef,
        amount: &str,
    ) -> Result<Quote, BridgeError> {
        let requested = Decimal::from_str(amount)
            .map_err(|_| BridgeError::rejected_permanently(format!("unparseable amount {}", amount)))?;
        let minimum = *self.minimum.lock();
        if let Some(minimum) = minimum {
            if requested < minimum {
                return Err(BridgeError::rejected_permanently(format!(
                    "amount {} below minimum {}",
                    amount, minimum
                )));
            }
        }
        Ok(quote_for(source_chain_id, source_token, dest_token, amount))
    }

    async fn validate_balance(
        &self,
        quote: &Quote,
        _address: &str,
    ) -> Result<BalanceValidation, BridgeError> {
        let balance = self.balance.lock().clone();
        let sufficient = crate::core::validation::amount_within(&quote.amount, &balance)?;
        Ok(BalanceValidation { sufficient, balance, required: quote.amount.clone() })
    }

    async fn execute_bridge(
        &self,
        quote: &Quote,
        _options: &ExecuteOptions,
    ) -> Result<Execution, BridgeError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.run_execute(quote).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn resume_execution(
        &self,
        execution_id: &str,
        from_step: usize,
    ) -> Result<StepStream, BridgeError> {
        let events = self
            .resumable
            .lock()
            .get(execution_id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("execution {}", execution_id)))?;
        let remaining: Vec<StepEvent> = events
            .into_iter()
            .filter(|e| match e {
                StepEvent::Step { index, .. } => *index >= from_step,
                _ => true,
            })
            .collect();
        Ok(futures::stream::iter(remaining).boxed())
    }
}

/// Wallet whose connection state is set by the test.
pub struct StaticWallet {
    address: Mutex<Option<String>>,
    chain_id: AtomicU64,
    capability: ChainSwitchCapability,
    switches: Mutex<Vec<u64>>,
}

impl StaticWallet {
    pub fn connected(address: &str, chain_id: u64) -> Self {
        Self {
            address: Mutex::new(Some(address.to_string())),
            chain_id: AtomicU64::new(chain_id),
            capability: ChainSwitchCapability::Supported,
            switches: Mutex::new(Vec::new()),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            address: Mutex::new(None),
            chain_id: AtomicU64::new(0),
            capability: ChainSwitchCapability::Supported,
            switches: Mutex::new(Vec::new()),
        }
    }

    pub fn without_chain_switch(mut self) -> Self {
        self.capability = ChainSwitchCapability::Unsupported;
        self
    }

    pub fn set_address(&self, address: Option<&str>) {
        *self.address.lock() = address.map(str::to_string);
    }

    pub fn switches(&self) -> Vec<u64> {
        self.switches.lock().clone()
    }
}

#[async_trait]
impl WalletProvider for StaticWallet {
    fn current_address(&self) -> Option<String> {
        self.address.lock().clone()
    }

    fn is_connected(&self) -> bool {
        self.address.lock().is_some()
    }

    fn current_chain_id(&self) -> Option<u64> {
        self.is_connected().then(|| self.chain_id.load(Ordering::SeqCst))
    }

    fn chain_switch_capability(&self) -> ChainSwitchCapability {
        self.capability
    }

    async fn sign_and_switch_chain(&self, target_chain_id: u64) -> Result<(), BridgeError> {
        if self.capability == ChainSwitchCapability::Unsupported {
            return Err(BridgeError::CapabilityUnsupported("wallet_switchEthereumChain".into()));
        }
        self.switches.lock().push(target_chain_id);
        self.chain_id.store(target_chain_id, Ordering::SeqCst);
        Ok(())
    }
}

/// Captures every outcome it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    outcomes: Mutex<Vec<(OutcomeKind, BridgeOutcome)>>,
}

impl RecordingNotifier {
    pub fn outcomes(&self) -> Vec<(OutcomeKind, BridgeOutcome)> {
        self.outcomes.lock().clone()
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.lock().iter().filter(|(k, _)| *k == kind).count()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn on_bridge_outcome(&self, kind: OutcomeKind, outcome: BridgeOutcome) {
        self.outcomes.lock().push((kind, outcome));
    }
}
