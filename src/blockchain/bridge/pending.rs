// src/blockchain/bridge/pending.rs

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::errors::BridgeError;
use crate::core::validation::{validate_amount_strict, validate_evm_address, validate_token_symbol};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenRef {
    pub address: String,
    pub symbol: String,
}

impl TokenRef {
    pub fn new(address: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self { address: address.into(), symbol: symbol.into() }
    }
}

/// What the user asked for. Also the payload of a queued entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeIntent {
    pub wallet_address: String,
    pub source_chain_id: u64,
    pub source_chain_name: String,
    pub source_token: TokenRef,
    pub amount: String,
    pub dest_token: TokenRef,
    pub auto_deposit: bool,
}

impl BridgeIntent {
    /// Local checks only. Balance is the collaborator's call.
    pub fn validate(&self) -> Result<(), BridgeError> {
        validate_evm_address(&self.wallet_address)?;
        if self.source_chain_id == 0 {
            return Err(BridgeError::Validation("Source chain not selected".into()));
        }
        if self.source_token.address.trim().is_empty() || self.dest_token.address.trim().is_empty() {
            return Err(BridgeError::Validation("Token not selected".into()));
        }
        validate_token_symbol(&self.source_token.symbol)?;
        validate_token_symbol(&self.dest_token.symbol)?;
        validate_amount_strict(&self.amount)?;
        Ok(())
    }
}

/// Bridge intent captured while offline. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingBridge {
    pub id: String,
    pub created_at: i64,
    #[serde(flatten)]
    pub intent: BridgeIntent,
}

impl PendingBridge {
    pub fn new(intent: BridgeIntent, now_ms: i64) -> Self {
        Self { id: generate_pending_id(now_ms), created_at: now_ms, intent }
    }

    pub fn wallet_address(&self) -> &str {
        &self.intent.wallet_address
    }
}

/// `<millis>-<8 random alphanumerics>`
pub fn generate_pending_id(now_ms: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{}-{}", now_ms, suffix.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::bridge::mock::sample_intent;

    #[test]
    fn test_pending_id_shape() {
        let id = generate_pending_id(1_700_000_000_000);
        let (millis, suffix) = id.split_once('-').unwrap();
        assert_eq!(millis, "1700000000000");
        assert_eq!(suffix.len(), 8);
        assert_ne!(generate_pending_id(1), generate_pending_id(1));
    }

    #[test]
    fn test_flattened_serialization() {
        let entry = PendingBridge::new(sample_intent("10.5"), 42);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["amount"], "10.5");
        assert_eq!(json["source_chain_id"], 42161);
        let back: PendingBridge = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_intent_validation() {
        assert!(sample_intent("10.5").validate().is_ok());
        assert!(sample_intent("0").validate().is_err());
        let mut bad = sample_intent("1");
        bad.source_chain_id = 0;
        assert!(bad.validate().is_err());
    }
}
