//! Memoized prefetch results and the pure rules built on them.
//!
//! A step's output is stored once it succeeds, so a retried prefetch only
//! re-runs the steps that are still missing.

use alloy::primitives::U256;

use crate::account::Account;
use crate::approval::types::{CantProcessReason, ConfirmBlocker, PrefetchNotice, PrefetchStep, TxItem};
use crate::chain::ChainInfo;
use crate::config::schema::{ApprovalConfig, GasConfig};
use crate::gas::recommend::{apply_gas_price, calc_max_priority_fee, convert_legacy_to_1559, gas_too_high};
use crate::gas::{GasCheckCode, GasCheckError, GasError, GasLevelKind, GasQuote, GasResult};
use crate::payment::{GasPaymentMethod, GasPaymentResolver};
use crate::security::SecuritySession;

#[derive(Debug, Clone, Default)]
pub struct PrefetchData {
    /// `None` with `nonce_done` set means the account has no EOA nonce (Safe).
    pub recommended_nonce: Option<u64>,
    pub nonce_done: bool,
    pub balance: Option<U256>,
    pub quote: Option<GasQuote>,
    /// Outer `None`: not fetched yet.
    pub median_price: Option<Option<u128>>,
    pub simulated: bool,
    pub gas_planned: bool,
    pub costs_done: bool,
    pub security_loaded: bool,
    pub payment_loaded: bool,
}

impl PrefetchData {
    pub fn phase_a_done(&self) -> bool {
        self.nonce_done && self.balance.is_some() && self.quote.is_some() && self.median_price.is_some()
    }

    /// Simulation and gas data are in; confirm may be considered.
    pub fn is_ready(&self) -> bool {
        self.phase_a_done() && self.simulated && self.gas_planned && self.costs_done
    }
}

/// Replace (not append) the notice for `step`.
pub fn set_notice(notices: &mut Vec<PrefetchNotice>, step: PrefetchStep, message: impl Into<String>) {
    notices.retain(|n| n.step != step);
    notices.push(PrefetchNotice {
        step,
        message: message.into(),
    });
}

pub fn clear_notice(notices: &mut Vec<PrefetchNotice>, step: PrefetchStep) {
    notices.retain(|n| n.step != step);
}

/// Put the selected level's price on every draft, producing new drafts.
pub fn price_items(items: &mut [TxItem], chain: &ChainInfo, quote: &GasQuote, level: GasLevelKind) -> GasResult<()> {
    let selected = quote.level(level).ok_or(GasError::MissingLevel(level))?;
    let priority = calc_max_priority_fee(selected);
    for item in items.iter_mut() {
        let converted = convert_legacy_to_1559(&item.draft, chain);
        item.draft = apply_gas_price(&converted, chain, selected.price, priority);
    }
    Ok(())
}

/// Sponsorship is worth offering: native gas is short, or the sponsor promotes itself.
pub fn gasless_advertised(errors: &[GasCheckError], resolver: &GasPaymentResolver) -> bool {
    let native_short = errors.iter().any(|e| e.code == GasCheckCode::InsufficientBalance);
    native_short || resolver.gasless().promotion.is_some()
}

/// Everything that currently disables confirm, in display order.
pub struct BlockerInputs<'a> {
    pub ready: bool,
    pub account: &'a Account,
    pub items: &'a [TxItem],
    pub gas_errors: &'a [GasCheckError],
    pub security: &'a SecuritySession,
    pub security_loaded: bool,
    pub resolver: &'a GasPaymentResolver,
    pub chain: &'a ChainInfo,
    pub approval: &'a ApprovalConfig,
    pub gas: &'a GasConfig,
}

pub fn confirm_blockers(inputs: &BlockerInputs<'_>) -> Vec<ConfirmBlocker> {
    let mut blockers = Vec::new();

    if !inputs.account.keyring.can_sign() {
        blockers.push(ConfirmBlocker::CannotProcess {
            reason: CantProcessReason::WatchOnly,
        });
    }
    if !inputs.ready {
        blockers.push(ConfirmBlocker::NotReady);
        return blockers;
    }

    if inputs.approval.block_on_simulation_failure {
        for (index, item) in inputs.items.iter().enumerate() {
            if item.simulation.as_ref().map(|s| !s.success).unwrap_or(false) {
                blockers.push(ConfirmBlocker::SimulationFailed { index });
            }
        }
    }

    let method = inputs.resolver.method();
    for error in inputs.gas_errors.iter().filter(|e| e.is_forbidden()) {
        // balance is irrelevant when someone else pays for gas
        let applies = match error.code {
            GasCheckCode::InsufficientBalance => method == GasPaymentMethod::Native,
            _ => true,
        };
        if applies {
            blockers.push(ConfirmBlocker::GasCheck {
                index: error.index,
                code: error.code,
            });
        }
    }

    if !inputs.security_loaded {
        blockers.push(ConfirmBlocker::SecurityPending);
    } else if inputs.security.verdict().has_unprocessed {
        blockers.push(ConfirmBlocker::SecurityUnprocessed {
            rule_ids: inputs.security.verdict().pending_rule_ids.clone(),
        });
    }

    match method {
        GasPaymentMethod::Native => {
            let usd: f64 = inputs
                .items
                .iter()
                .filter_map(|i| i.cost.as_ref())
                .map(|c| c.gas_cost_usd)
                .sum();
            if gas_too_high(inputs.gas, inputs.chain, usd) {
                blockers.push(ConfirmBlocker::GasTooHigh);
            }
        }
        GasPaymentMethod::Gasless | GasPaymentMethod::GasAccount => {
            let loaded = match method {
                GasPaymentMethod::Gasless => inputs.resolver.gasless().loaded,
                _ => inputs.resolver.gas_account().loaded,
            };
            if !loaded {
                blockers.push(ConfirmBlocker::PaymentPending);
            } else if let Some(reason) = inputs.resolver.blocker() {
                blockers.push(ConfirmBlocker::PaymentUnavailable { reason });
            }
        }
    }

    blockers
}
