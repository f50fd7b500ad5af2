//! Chain identity, metadata and RPC error definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use crate::config::schema::ChainConfig;

/// Ethereum mainnet.
pub const ETHEREUM_MAINNET: ChainId = ChainId(1);

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolved chain metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub id: ChainId,
    /// Backend identifier, e.g. `eth`, `op`.
    pub server_id: String,
    /// Enum-style name, e.g. `ETH`, `OP`.
    pub name: String,
    pub native_token_symbol: String,
    /// Chain accepts EIP-1559 fee fields.
    pub eip1559: bool,
    /// Chain charges an L1 data fee on top of execution gas.
    pub l1_fee_estimation: bool,
    pub is_testnet: bool,
}

impl ChainInfo {
    pub fn is_ethereum_mainnet(&self) -> bool {
        self.id == ETHEREUM_MAINNET
    }
}

impl From<&ChainConfig> for ChainInfo {
    fn from(config: &ChainConfig) -> Self {
        Self {
            id: ChainId(config.chain_id),
            server_id: config.server_id.clone(),
            name: config.name.clone(),
            native_token_symbol: config.native_token_symbol.clone(),
            eip1559: config.eip1559,
            l1_fee_estimation: config.l1_fee_estimation,
            is_testnet: config.is_testnet,
        }
    }
}

/// Errors that can occur during chain operations.
#[derive(Debug, Error)]
pub enum ChainError {
    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// Chain is not present in the registry.
    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    /// Chain configuration mismatch.
    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    /// No RPC client configured for the chain.
    #[error("Chain not available: {0}")]
    NotAvailable(String),
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
