//! Gas levels, costs and check codes.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::chain::ChainError;
use crate::services::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GasLevelKind {
    Slow,
    Normal,
    Fast,
    Custom,
}

impl fmt::Display for GasLevelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GasLevelKind::Slow => "slow",
            GasLevelKind::Normal => "normal",
            GasLevelKind::Fast => "fast",
            GasLevelKind::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// One price level of a quote. Prices in wei.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasLevel {
    pub level: GasLevelKind,
    pub price: u128,
    /// EIP-1559 tip, when the market reports one.
    #[serde(default)]
    pub priority_price: Option<u128>,
    #[serde(default)]
    pub estimated_seconds: f64,
    /// Transactions ahead in the queue at this price.
    #[serde(default)]
    pub front_tx_count: u64,
    #[serde(default)]
    pub base_fee: Option<u128>,
}

impl GasLevel {
    pub fn custom(price: u128) -> Self {
        Self {
            level: GasLevelKind::Custom,
            price,
            priority_price: None,
            estimated_seconds: 0.0,
            front_tx_count: 0,
            base_fee: None,
        }
    }
}

/// The four levels of one quote refresh. Only the custom level changes in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasQuote {
    levels: Vec<GasLevel>,
}

impl GasQuote {
    /// Build from a market answer; a missing custom level is seeded from `normal`.
    pub fn new(mut levels: Vec<GasLevel>) -> GasResult<Self> {
        if levels.is_empty() {
            return Err(GasError::NoGasLevels);
        }
        if !levels.iter().any(|l| l.level == GasLevelKind::Custom) {
            let seed = levels
                .iter()
                .find(|l| l.level == GasLevelKind::Normal)
                .unwrap_or(&levels[0])
                .price;
            levels.push(GasLevel::custom(seed));
        }
        Ok(Self { levels })
    }

    pub fn level(&self, kind: GasLevelKind) -> Option<&GasLevel> {
        self.levels.iter().find(|l| l.level == kind)
    }

    pub fn levels(&self) -> &[GasLevel] {
        &self.levels
    }

    pub fn set_custom_price(&mut self, price: u128) {
        for level in self.levels.iter_mut().filter(|l| l.level == GasLevelKind::Custom) {
            level.price = price;
            level.priority_price = None;
        }
    }
}

/// Gas recommendation for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasRecommendation {
    pub gas: u64,
    /// Gas the simulator reported as used.
    pub gas_used: u64,
    /// A safety ratio should be applied when deriving the final limit.
    pub need_ratio: bool,
}

/// Final gas limit and the ratio it was derived with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GasLimitPlan {
    pub gas_limit: u64,
    pub ratio: f64,
    /// Recommendation scaled by the ratio, before any balance fallback.
    pub recommended_gas_limit: u64,
}

/// Expected and worst-case cost of one transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GasCost {
    pub gas_cost_wei: U256,
    pub max_gas_cost_wei: U256,
    pub l1_fee_wei: U256,
    /// Native token amounts.
    pub gas_cost_amount: f64,
    pub max_gas_cost_amount: f64,
    pub gas_cost_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckLevel {
    Warn,
    Danger,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum GasCheckCode {
    /// Balance cannot cover value + max gas cost.
    InsufficientBalance = 3001,
    /// Nonce below the recommendation.
    NonceTooLow = 3003,
    /// Gas limit below the ratio-scaled recommendation.
    GasLimitBelowRecommended = 3004,
    /// Gas limit below the unscaled recommendation.
    GasLimitBelowUsage = 3005,
    /// Gas limit below the absolute minimum.
    GasLimitTooLow = 3006,
}

impl GasCheckCode {
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl From<GasCheckCode> for u16 {
    fn from(code: GasCheckCode) -> Self {
        code as u16
    }
}

impl TryFrom<u16> for GasCheckCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            3001 => Ok(GasCheckCode::InsufficientBalance),
            3003 => Ok(GasCheckCode::NonceTooLow),
            3004 => Ok(GasCheckCode::GasLimitBelowRecommended),
            3005 => Ok(GasCheckCode::GasLimitBelowUsage),
            3006 => Ok(GasCheckCode::GasLimitTooLow),
            other => Err(format!("unknown gas check code {}", other)),
        }
    }
}

/// One finding of the gas and nonce checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasCheckError {
    /// Batch position of the offending transaction.
    pub index: usize,
    pub code: GasCheckCode,
    pub level: Option<CheckLevel>,
    pub message: String,
}

impl GasCheckError {
    pub fn is_forbidden(&self) -> bool {
        self.level == Some(CheckLevel::Forbidden)
    }
}

#[derive(Debug, Error)]
pub enum GasError {
    #[error("gas market returned no levels")]
    NoGasLevels,

    #[error("gas level {0} missing from quote")]
    MissingLevel(GasLevelKind),

    #[error("L1 fee unavailable: {0}")]
    L1Fee(ServiceError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

pub type GasResult<T> = Result<T, GasError>;
