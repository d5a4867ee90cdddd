use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::core::errors::BridgeError;

static EVM_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("Hardcoded regex should always compile")
});

// Up to 18 decimals, no sign, no exponent.
static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:0|[1-9]\d*)(?:\.\d{1,18})?$")
        .expect("Decimal regex pattern should always be valid")
});

/// Validates an EVM wallet or token address. Checksum casing is not enforced,
/// addresses are compared case-insensitively everywhere.
pub fn validate_evm_address(address: &str) -> Result<(), BridgeError> {
    if !EVM_ADDRESS_RE.is_match(address) {
        return Err(BridgeError::Validation(format!("Invalid address: {}", address)));
    }
    Ok(())
}

pub fn addresses_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Strict decimal validator for amounts to avoid float parsing where exactness
/// matters. Accepts 123, 0.1, 1.234567 up to 18 decimals; the value must be > 0.
pub fn validate_amount_strict(amount: &str) -> Result<Decimal, BridgeError> {
    if amount.is_empty() {
        return Err(BridgeError::Validation("Amount cannot be empty".into()));
    }
    if !AMOUNT_RE.is_match(amount) {
        return Err(BridgeError::Validation(format!("Invalid decimal amount: {}", amount)));
    }
    let value = Decimal::from_str(amount)
        .map_err(|e| BridgeError::Validation(format!("Invalid decimal amount: {}", e)))?;
    if value <= Decimal::ZERO {
        return Err(BridgeError::Validation("Amount must be positive".into()));
    }
    Ok(value)
}

/// `amount <= available`, both decimal strings.
pub fn amount_within(amount: &str, available: &str) -> Result<bool, BridgeError> {
    let amount = validate_amount_strict(amount)?;
    let available = Decimal::from_str(available)
        .map_err(|e| BridgeError::Validation(format!("Invalid balance: {}", e)))?;
    Ok(amount <= available)
}

pub fn validate_token_symbol(symbol: &str) -> Result<(), BridgeError> {
    if symbol.is_empty()
        || symbol.len() > 20
        || !symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
    {
        return Err(BridgeError::Validation(format!("Invalid token symbol: {}", symbol)));
    }
    Ok(())
}
