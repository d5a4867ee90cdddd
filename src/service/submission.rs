//! The one path from a bridge intent to an accepted execution. Immediate
//! submissions and queue replay both go through [`submit_intent`].

use std::time::Duration;
use tracing::{debug, info};

use crate::blockchain::bridge::{BridgeIntent, TransactionRecord};
use crate::blockchain::traits::{
    BridgeClient, ChainSwitchCapability, ExecuteOptions, Execution, Quote, StepStream,
    WalletProvider,
};
use crate::core::clock::Clock;
use crate::core::errors::BridgeError;
use crate::tools::async_support::{AsyncExecutor, TimeoutConfig};

pub(crate) struct Submission {
    pub record: TransactionRecord,
    pub steps: StepStream,
}

/// Switch the wallet onto the source chain. Capability is probed once here.
async fn ensure_source_chain(
    wallet: &dyn WalletProvider,
    source_chain_id: u64,
) -> Result<(), BridgeError> {
    if wallet.current_chain_id() == Some(source_chain_id) {
        return Ok(());
    }
    match wallet.chain_switch_capability() {
        ChainSwitchCapability::Supported => {
            debug!(chain_id = source_chain_id, "Switching wallet chain");
            wallet.sign_and_switch_chain(source_chain_id).await
        }
        ChainSwitchCapability::Unsupported => Err(BridgeError::CapabilityUnsupported(format!(
            "wallet cannot switch to chain {}",
            source_chain_id
        ))),
    }
}

async fn quote_and_execute(
    bridge: &dyn BridgeClient,
    wallet: &dyn WalletProvider,
    intent: &BridgeIntent,
) -> Result<(Quote, Execution), BridgeError> {
    ensure_source_chain(wallet, intent.source_chain_id).await?;

    let quote = bridge
        .get_quote(intent.source_chain_id, &intent.source_token, &intent.dest_token, &intent.amount)
        .await?;

    let balance = bridge.validate_balance(&quote, &intent.wallet_address).await?;
    if !balance.sufficient {
        return Err(BridgeError::rejected(format!(
            "Insufficient balance: have {}, need {}",
            balance.balance, balance.required
        )));
    }

    let execution = bridge
        .execute_bridge(
            &quote,
            &ExecuteOptions {
                wallet_address: intent.wallet_address.clone(),
                auto_deposit: intent.auto_deposit,
            },
        )
        .await?;
    Ok((quote, execution))
}

/// Validate, quote, check balance and execute, bounded by `timeout` as a whole.
/// The returned record is `pending` and not yet persisted.
pub(crate) async fn submit_intent(
    bridge: &dyn BridgeClient,
    wallet: &dyn WalletProvider,
    clock: &dyn Clock,
    intent: &BridgeIntent,
    timeout: Duration,
) -> Result<Submission, BridgeError> {
    intent.validate()?;

    let (quote, execution) = AsyncExecutor::execute_with_timeout(
        quote_and_execute(bridge, wallet, intent),
        TimeoutConfig::submission(timeout),
    )
    .await?;

    info!(
        execution_id = %execution.execution_id,
        amount = %quote.amount,
        token = %quote.source_token.symbol,
        "Bridge accepted"
    );
    let record = TransactionRecord::accepted(&execution.execution_id, &quote, clock.now_ms());
    Ok(Submission { record, steps: execution.steps })
}
