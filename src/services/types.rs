//! Wire types exchanged with external collaborators.

use alloy::primitives::{Address, Bytes, TxHash};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::chain::{ChainError, ChainInfo};
use crate::gas::GasLevelKind;
use crate::payment::GasPaymentMethod;
use crate::transaction::TransactionDraft;

/// Failure of a backend read.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("{service} request failed: {message}")]
    Request { service: &'static str, message: String },

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("{service} returned an invalid response: {message}")]
    InvalidResponse { service: &'static str, message: String },

    #[error("chain error: {0}")]
    Chain(String),
}

impl ServiceError {
    pub fn request(service: &'static str, message: impl Into<String>) -> Self {
        Self::Request {
            service,
            message: message.into(),
        }
    }

    /// Worth retrying without user involvement.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Request { .. } | ServiceError::Timeout(_) | ServiceError::Chain(_))
    }
}

impl From<ChainError> for ServiceError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Timeout(_) => ServiceError::Timeout("rpc"),
            other => ServiceError::Chain(other.to_string()),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Balance movement predicted by simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceChange {
    pub success: bool,
    pub send_usd_value: f64,
    pub receive_usd_value: f64,
    pub error: Option<String>,
}

/// Outcome of pre-executing one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub success: bool,
    pub gas_used: u64,
    /// Gas limit the simulator would use, when it knows better.
    pub gas_limit: Option<u64>,
    /// Estimate-derived gas; zero when estimation failed.
    pub estimated_gas: u64,
    /// Ratio the simulator wants applied instead of the configured one.
    pub gas_ratio: Option<f64>,
    pub balance_change: BalanceChange,
    /// Native token price in USD at simulation time.
    pub native_token_price: f64,
    pub trace_id: Option<String>,
    pub error: Option<String>,
}

/// Sponsorship verdict for a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaslessCheck {
    pub is_gasless: bool,
    pub desc: Option<String>,
    pub promotion: Option<GaslessPromotion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaslessPromotion {
    pub id: String,
    #[serde(default)]
    pub config: Option<PromotionConfig>,
}

/// Display copy shipped with a promotion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    pub button_text: String,
    pub before_click_text: String,
    pub logo: Option<String>,
    pub theme_color: String,
    pub dark_color: String,
}

/// Gas account login proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasAccountAuth {
    pub account_id: String,
    pub signature: String,
}

/// Cost breakdown in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasAccountCost {
    pub total_cost: f64,
    pub tx_cost: f64,
    pub gas_cost: f64,
    pub estimate_tx_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasAccountCheck {
    pub balance_is_enough: bool,
    pub chain_not_support: bool,
    pub is_gas_account: bool,
    pub cost: GasAccountCost,
}

/// Everything the rule engine looks at.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    pub session_id: Uuid,
    pub chain: ChainInfo,
    pub origin: Option<String>,
    pub drafts: Vec<TransactionDraft>,
    pub simulations: Vec<SimulationResult>,
}

/// One signing attempt for one batch entry.
#[derive(Debug, Clone)]
pub struct SignRequest {
    pub task_id: Uuid,
    pub index: usize,
    pub chain: ChainInfo,
    pub draft: TransactionDraft,
    pub payment_method: GasPaymentMethod,
    pub gas_level: GasLevelKind,
    pub gas_account: Option<GasAccountAuth>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOutcome {
    pub tx_hash: TxHash,
    /// Signed envelope when the backend exposes it.
    pub raw: Option<Bytes>,
}

/// Why signing did not produce a broadcast.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("user rejected the signature request")]
    Rejected,

    #[error("nonce too low: {0}")]
    NonceTooLow(String),

    #[error("transaction underpriced: {0}")]
    Underpriced(String),

    #[error("insufficient funds for gas: {0}")]
    InsufficientFunds(String),

    #[error("no signer for {0}")]
    UnknownSigner(Address),

    #[error("account cannot sign")]
    CannotSign,

    #[error("signing backend failed: {0}")]
    Backend(String),

    #[error("broadcast failed: {0}")]
    Broadcast(String),
}

impl SigningError {
    /// Map a node error message onto a retryable class where possible.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("nonce too low") || lower.contains("already known") {
            SigningError::NonceTooLow(message.to_string())
        } else if lower.contains("underpriced") || lower.contains("fee too low") {
            SigningError::Underpriced(message.to_string())
        } else if lower.contains("insufficient funds") {
            SigningError::InsufficientFunds(message.to_string())
        } else {
            SigningError::Broadcast(message.to_string())
        }
    }
}

pub type SigningResult<T> = Result<T, SigningError>;
