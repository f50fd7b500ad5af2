//! Gas-limit, balance and nonce checks over a batch.
//!
//! Entries are checked in batch order against a running balance: each
//! entry's value plus worst-case gas cost is debited before the next one is
//! looked at, so a batch can fail as a whole even when every entry fits alone.

use alloy::primitives::U256;

use crate::gas::types::{CheckLevel, GasCheckCode, GasCheckError};
use crate::observability::metrics;
use crate::transaction::TransactionDraft;

/// One batch entry as the checks see it.
#[derive(Debug, Clone, Copy)]
pub struct GasCheckItem<'a> {
    pub draft: &'a TransactionDraft,
    pub gas_limit: u64,
    /// Recommendation before any ratio is applied.
    pub recommended_gas: u64,
    pub max_gas_cost: U256,
    pub recommended_nonce: Option<u64>,
}

/// Batch-wide parameters.
#[derive(Debug, Clone, Copy)]
pub struct GasCheckParams {
    /// Ratio in effect for this chain.
    pub ratio: f64,
    /// Configured default ratio.
    pub default_ratio: f64,
    pub min_gas_limit: u64,
    /// Safe accounts skip the gas and balance checks.
    pub is_multisig: bool,
}

/// Run every check over the batch; errors come back in batch order.
pub fn check_gas_and_nonce(items: &[GasCheckItem<'_>], balance: U256, params: &GasCheckParams) -> Vec<GasCheckError> {
    let mut errors = Vec::new();
    let mut remaining = balance;
    let mut in_debt = false;

    for (index, item) in items.iter().enumerate() {
        if !params.is_multisig {
            check_gas_limit(index, item, params, &mut errors);

            let cost = item.max_gas_cost.saturating_add(item.draft.value);
            if in_debt || cost > remaining {
                errors.push(GasCheckError {
                    index,
                    code: GasCheckCode::InsufficientBalance,
                    level: Some(CheckLevel::Forbidden),
                    message: "The reserved gas fee plus value exceeds the remaining balance".to_string(),
                });
            }
            match remaining.checked_sub(cost) {
                Some(left) if !in_debt => remaining = left,
                _ => in_debt = true,
            }
        }

        let replaces_pending = item.draft.replaces_pending();
        if let (Some(nonce), Some(recommended)) = (item.draft.nonce, item.recommended_nonce) {
            if nonce < recommended && !replaces_pending {
                errors.push(GasCheckError {
                    index,
                    code: GasCheckCode::NonceTooLow,
                    level: None,
                    message: format!("Nonce {} is lower than the recommended {}", nonce, recommended),
                });
            }
        }
    }

    for error in &errors {
        metrics::record_gas_check_error(error.code.code());
    }
    if !errors.is_empty() {
        tracing::debug!(
            batch_size = items.len(),
            errors = errors.len(),
            "Gas and nonce checks reported problems"
        );
    }
    errors
}

fn check_gas_limit(index: usize, item: &GasCheckItem<'_>, params: &GasCheckParams, errors: &mut Vec<GasCheckError>) {
    let gas_limit = item.gas_limit;
    if gas_limit < params.min_gas_limit {
        errors.push(GasCheckError {
            index,
            code: GasCheckCode::GasLimitTooLow,
            level: Some(CheckLevel::Forbidden),
            message: format!("Gas limit is below the minimum of {}", params.min_gas_limit),
        });
        return;
    }

    let recommended = item.recommended_gas as f64;
    if (gas_limit as f64) >= recommended * params.ratio {
        return;
    }

    if params.ratio == params.default_ratio {
        let actual = if item.recommended_gas == 0 {
            f64::INFINITY
        } else {
            gas_limit as f64 / recommended
        };
        if actual < 1.0 {
            errors.push(GasCheckError {
                index,
                code: GasCheckCode::GasLimitBelowUsage,
                level: Some(CheckLevel::Danger),
                message: "Gas limit is below the estimated usage; the transaction will likely fail".to_string(),
            });
        } else if actual > 1.0 && actual < params.default_ratio {
            errors.push(GasCheckError {
                index,
                code: GasCheckCode::GasLimitBelowRecommended,
                level: Some(CheckLevel::Warn),
                message: "Gas limit is below the recommended safety margin".to_string(),
            });
        }
    } else if gas_limit < item.recommended_gas {
        errors.push(GasCheckError {
            index,
            code: GasCheckCode::GasLimitBelowRecommended,
            level: Some(CheckLevel::Warn),
            message: "Gas limit is below the recommended value".to_string(),
        });
    }
}
