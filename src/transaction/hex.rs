//! Lenient parsing of JSON-RPC quantities and byte strings.
//!
//! dApps send quantities as `0x` hex, bare hex without prefix, or JSON
//! numbers. Bare strings are read as hex, the same way an `0x` prefix would
//! be added to them.

use alloy::primitives::{Address, Bytes, U256};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("not a hex quantity: {0}")]
    Invalid(String),

    #[error("negative or non-finite number: {0}")]
    NotUnsigned(String),

    #[error("quantity does not fit in {0}")]
    Overflow(&'static str),

    #[error("invalid address: {0}")]
    Address(String),

    #[error("invalid hex data: {0}")]
    Data(String),
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Parse a quantity; `null` and empty strings mean "absent".
pub fn parse_quantity(value: &Value) -> Result<Option<U256>, QuantityError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                return Ok(Some(U256::from(v)));
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f >= 0.0 && f < u128::MAX as f64 => {
                    Ok(Some(U256::from(f.floor() as u128)))
                }
                _ => Err(QuantityError::NotUnsigned(n.to_string())),
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let digits = strip_hex_prefix(trimmed);
            if digits.is_empty() {
                return Ok(Some(U256::ZERO));
            }
            U256::from_str_radix(digits, 16)
                .map(Some)
                .map_err(|_| QuantityError::Invalid(s.clone()))
        }
        other => Err(QuantityError::Invalid(other.to_string())),
    }
}

pub fn parse_u64(value: &Value) -> Result<Option<u64>, QuantityError> {
    parse_quantity(value)?
        .map(|v| u64::try_from(v).map_err(|_| QuantityError::Overflow("u64")))
        .transpose()
}

pub fn parse_u128(value: &Value) -> Result<Option<u128>, QuantityError> {
    parse_quantity(value)?
        .map(|v| u128::try_from(v).map_err(|_| QuantityError::Overflow("u128")))
        .transpose()
}

/// Parse an address, tolerating a missing prefix and any checksum casing.
pub fn parse_address(s: &str) -> Result<Address, QuantityError> {
    let digits = strip_hex_prefix(s.trim());
    format!("0x{}", digits.to_ascii_lowercase())
        .parse::<Address>()
        .map_err(|_| QuantityError::Address(s.to_string()))
}

/// Parse call data; empty input becomes `0x`.
pub fn parse_data(s: &str) -> Result<Bytes, QuantityError> {
    let digits = strip_hex_prefix(s.trim());
    if digits.is_empty() {
        return Ok(Bytes::new());
    }
    alloy::hex::decode(digits)
        .map(Bytes::from)
        .map_err(|_| QuantityError::Data(s.to_string()))
}
