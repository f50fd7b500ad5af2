//! Gas limit and fee derivation.
//!
//! Pure functions; the async sourcing of their inputs lives in [`crate::gas::GasEngine`].

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::chain::ChainInfo;
use crate::config::schema::GasConfig;
use crate::gas::types::{GasLevel, GasLevelKind, GasLimitPlan, GasRecommendation};
use crate::transaction::{TransactionDraft, TxFlags};

/// Pick the recommendation source without touching history.
///
/// Returns `None` when only a history lookup (or the fallback) can answer.
pub fn recommend_from_request(estimated_gas: u64, gas_used: u64, tx: &TransactionDraft) -> Option<GasRecommendation> {
    if estimated_gas > 0 {
        return Some(GasRecommendation {
            gas: estimated_gas,
            gas_used,
            need_ratio: true,
        });
    }
    match tx.gas_limit {
        Some(limit) if limit > 0 => Some(GasRecommendation {
            gas: limit,
            gas_used: limit,
            need_ratio: true,
        }),
        _ => None,
    }
}

/// History sample if there is one, else the fixed fallback.
pub fn recommend_from_history(history_gas_used: Option<u64>, fallback_gas_limit: u64) -> GasRecommendation {
    match history_gas_used {
        Some(used) if used > 0 => GasRecommendation {
            gas: used,
            gas_used: used,
            need_ratio: true,
        },
        _ => GasRecommendation {
            gas: fallback_gas_limit,
            gas_used: fallback_gas_limit,
            need_ratio: false,
        },
    }
}

/// Inputs of [`calc_gas_limit`].
#[derive(Debug, Clone, Copy)]
pub struct GasLimitInputs {
    pub recommendation: GasRecommendation,
    /// Chain ratio, or the simulator's when it sent one.
    pub ratio: f64,
    /// Limit the dApp already put on the draft.
    pub requested_gas_limit: Option<u64>,
    pub fee_cap: u128,
    pub value: U256,
    pub balance: Option<U256>,
    pub is_multisig: bool,
}

/// Derive the gas limit shown to the user.
pub fn calc_gas_limit(inputs: &GasLimitInputs) -> GasLimitPlan {
    let rec = inputs.recommendation;
    let ratio = if inputs.is_multisig || !rec.need_ratio || !(inputs.ratio > 0.0) {
        1.0
    } else {
        inputs.ratio
    };
    let scaled = (rec.gas as f64 * ratio).ceil() as u64;

    if let Some(requested) = inputs.requested_gas_limit.filter(|l| *l > 0) {
        return GasLimitPlan {
            gas_limit: requested,
            ratio,
            recommended_gas_limit: scaled,
        };
    }

    let mut gas_limit = scaled;
    if let Some(balance) = inputs.balance {
        let fee = U256::from(inputs.fee_cap);
        let scaled_cost = U256::from(scaled) * fee + inputs.value;
        let unscaled_cost = U256::from(rec.gas) * fee + inputs.value;
        if scaled_cost > balance && unscaled_cost <= balance {
            gas_limit = rec.gas;
        }
    }

    GasLimitPlan {
        gas_limit,
        ratio,
        recommended_gas_limit: scaled,
    }
}

/// The level's tip capped by its price, else the price.
pub fn calc_max_priority_fee(level: &GasLevel) -> u128 {
    match level.priority_price {
        Some(priority) => priority.min(level.price),
        None => level.price,
    }
}

/// Put a level's price on a draft in the chain's fee style.
pub fn apply_gas_price(draft: &TransactionDraft, chain: &ChainInfo, price: u128, max_priority_fee: u128) -> TransactionDraft {
    if chain.eip1559 {
        let priority = if max_priority_fee == 0 { price } else { max_priority_fee.min(price) };
        draft.with_eip1559_fees(price, priority)
    } else {
        draft.with_legacy_price(price)
    }
}

/// Rewrite a legacy draft with EIP-1559 fields on chains that accept them.
pub fn convert_legacy_to_1559(draft: &TransactionDraft, chain: &ChainInfo) -> TransactionDraft {
    match draft.gas_price {
        Some(price) if chain.eip1559 && !draft.is_eip1559() => draft.with_eip1559_fees(price, price),
        _ => draft.clone(),
    }
}

/// Multiply the draft's fees by `factor`, rounding up.
pub fn bump_fees(draft: &TransactionDraft, factor: f64) -> TransactionDraft {
    let bump = |v: u128| (v as f64 * factor).ceil() as u128;
    match (draft.max_fee_per_gas, draft.max_priority_fee_per_gas, draft.gas_price) {
        (Some(max_fee), priority, _) => {
            let max_fee = bump(max_fee);
            let priority = priority.map(bump).unwrap_or(max_fee).min(max_fee);
            draft.with_eip1559_fees(max_fee, priority)
        }
        (None, _, Some(price)) => draft.with_legacy_price(bump(price)),
        _ => draft.clone(),
    }
}

/// Gas selection remembered from the previous approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastGasSelection {
    pub level: GasLevelKind,
    pub custom_price: Option<u128>,
}

/// Level selected when a task opens, and the custom price to seed the quote with.
pub fn select_initial_level(
    flags: &TxFlags,
    caller_price: Option<u128>,
    last: Option<LastGasSelection>,
) -> (GasLevelKind, Option<u128>) {
    let caller_priced = (flags.is_send || flags.is_swap || flags.is_bridge) && caller_price.is_some();
    if caller_priced || flags.is_speed_up || flags.is_cancel {
        return (GasLevelKind::Custom, caller_price);
    }
    match last {
        Some(LastGasSelection {
            level: GasLevelKind::Custom,
            custom_price: Some(price),
        }) => (GasLevelKind::Custom, Some(price)),
        Some(LastGasSelection {
            level: GasLevelKind::Custom,
            custom_price: None,
        }) => (GasLevelKind::Normal, None),
        Some(selection) => (selection.level, None),
        None => (GasLevelKind::Normal, None),
    }
}

/// USD gas cost above which signing is refused, when the guard is on.
pub fn gas_too_high(config: &GasConfig, chain: &ChainInfo, gas_cost_usd: f64) -> bool {
    if !config.gas_too_high_guard {
        return false;
    }
    let limit = if chain.is_ethereum_mainnet() {
        config.gas_too_high_usd_mainnet
    } else {
        config.gas_too_high_usd_other
    };
    gas_cost_usd > limit
}
