//! Raw requests and canonical transaction drafts.

use alloy::eips::eip7702::SignedAuthorization;
use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::chain::ChainId;

/// Transaction as received from a dApp; every field optional and loosely typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTransaction {
    pub chain_id: Option<Value>,
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(alias = "input")]
    pub data: Option<String>,
    pub value: Option<Value>,
    pub nonce: Option<Value>,
    pub gas: Option<Value>,
    pub gas_limit: Option<Value>,
    pub gas_price: Option<Value>,
    pub max_fee_per_gas: Option<Value>,
    pub max_priority_fee_per_gas: Option<Value>,
    pub authorization_list: Option<Value>,
}

/// Caller context that cannot be derived from the transaction itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestHints {
    pub is_send: bool,
    pub is_swap: bool,
    pub is_bridge: bool,
    pub is_speed_up: bool,
    pub is_cancel: bool,
    pub is_view_gnosis_safe: bool,
}

/// Flags derived during normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxFlags {
    pub is_send: bool,
    pub is_cancel: bool,
    pub is_speed_up: bool,
    pub is_swap: bool,
    pub is_bridge: bool,
    pub is_7702: bool,
    pub is_view_gnosis_safe: bool,
}

/// EIP-7702 authorizations; kept verbatim when they do not parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthorizationList {
    Signed(Vec<SignedAuthorization>),
    Unparsed(Value),
}

/// Canonical transaction. Edits produce a new draft instead of mutating one
/// that has already been simulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDraft {
    pub chain_id: ChainId,
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    #[serde(with = "alloy::serde::quantity::opt", default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(with = "alloy::serde::quantity::opt", default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    #[serde(with = "alloy::serde::quantity::opt", default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u128>,
    #[serde(with = "alloy::serde::quantity::opt", default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<u128>,
    #[serde(with = "alloy::serde::quantity::opt", default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_list: Option<AuthorizationList>,
    #[serde(default)]
    pub flags: TxFlags,
}

impl TransactionDraft {
    /// Minimal draft; everything else takes its default.
    pub fn new(chain_id: ChainId, from: Address, to: Option<Address>) -> Self {
        Self {
            chain_id,
            from,
            to,
            data: Bytes::new(),
            value: U256::ZERO,
            nonce: None,
            gas_limit: None,
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            authorization_list: None,
            flags: TxFlags::default(),
        }
    }

    /// Cancel or speed-up: reuses the nonce of a pending submission, which must not change.
    pub fn replaces_pending(&self) -> bool {
        self.flags.is_cancel || self.flags.is_speed_up
    }

    pub fn is_eip1559(&self) -> bool {
        self.max_fee_per_gas.is_some()
    }

    /// Highest price per gas this draft may pay.
    pub fn fee_cap(&self) -> u128 {
        self.max_fee_per_gas.or(self.gas_price).unwrap_or(0)
    }

    pub fn with_nonce(&self, nonce: u64) -> Self {
        Self {
            nonce: Some(nonce),
            ..self.clone()
        }
    }

    pub fn with_gas_limit(&self, gas_limit: u64) -> Self {
        Self {
            gas_limit: Some(gas_limit),
            ..self.clone()
        }
    }

    pub fn with_legacy_price(&self, gas_price: u128) -> Self {
        Self {
            gas_price: Some(gas_price),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            ..self.clone()
        }
    }

    pub fn with_eip1559_fees(&self, max_fee_per_gas: u128, max_priority_fee_per_gas: u128) -> Self {
        Self {
            gas_price: None,
            max_fee_per_gas: Some(max_fee_per_gas),
            max_priority_fee_per_gas: Some(max_priority_fee_per_gas),
            ..self.clone()
        }
    }

    /// Same sender and nonce; used to find the transaction a cancel or speed-up replaces.
    pub fn replaces(&self, other: &TransactionDraft) -> bool {
        self.chain_id == other.chain_id
            && self.from == other.from
            && self.nonce.is_some()
            && self.nonce == other.nonce
    }
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("empty transaction batch")]
    EmptyBatch,

    #[error("transaction {index}: missing sender")]
    MissingSender { index: usize },

    #[error("transaction {index}: missing chain id")]
    MissingChain { index: usize },

    #[error("transaction {index}: invalid {field}: {reason}")]
    InvalidField {
        index: usize,
        field: &'static str,
        reason: String,
    },

    #[error("batch mixes chains {expected} and {actual}")]
    MixedChains { expected: ChainId, actual: ChainId },
}

pub type NormalizeResult<T> = Result<T, NormalizeError>;
