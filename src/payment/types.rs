//! Payment methods and their eligibility.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::services::{GasAccountCheck, GaslessPromotion};

/// Who pays for gas. Exactly one is active per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GasPaymentMethod {
    #[default]
    Native,
    Gasless,
    GasAccount,
}

impl fmt::Display for GasPaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GasPaymentMethod::Native => "native",
            GasPaymentMethod::Gasless => "gasless",
            GasPaymentMethod::GasAccount => "gasAccount",
        };
        f.write_str(s)
    }
}

/// Why sponsorship is not available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum GaslessUnavailable {
    WatchOnlyAccount,
    WalletConnectAccount,
    MultisigAccount,
    CustomRpc,
    /// Sponsor declined; carries its explanation.
    NotSponsored(Option<String>),
    CheckFailed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GaslessStatus {
    /// First check finished (successfully or not).
    pub loaded: bool,
    pub can_use: bool,
    pub reason: Option<GaslessUnavailable>,
    pub promotion: Option<GaslessPromotion>,
}

impl GaslessStatus {
    /// The last check errored rather than answering.
    pub fn check_failed(&self) -> bool {
        matches!(self.reason, Some(GaslessUnavailable::CheckFailed(_)))
    }
}

/// Why the gas account cannot pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum GasAccountUnavailable {
    NotLoggedIn,
    UnsupportedAccount,
    CustomRpc,
    ExcludedChain,
    ChainNotSupported,
    InsufficientBalance,
    NotEligible,
    CheckFailed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GasAccountStatus {
    pub loaded: bool,
    pub check: Option<GasAccountCheck>,
    pub reason: Option<GasAccountUnavailable>,
}

impl GasAccountStatus {
    pub fn can_pay(&self) -> bool {
        self.loaded && self.reason.is_none() && self.check.is_some()
    }

    pub fn check_failed(&self) -> bool {
        matches!(self.reason, Some(GasAccountUnavailable::CheckFailed(_)))
    }

    /// USD charged to the gas account for the selected level.
    pub fn cost_usd(&self) -> Option<f64> {
        self.check
            .as_ref()
            .map(|c| c.cost.estimate_tx_cost + c.cost.gas_cost)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("payment method cannot change while signing")]
    SwitchWhileSigning,

    #[error("{method} is not available: {reason}")]
    Unavailable { method: GasPaymentMethod, reason: String },
}

pub type PaymentResult<T> = Result<T, PaymentError>;
