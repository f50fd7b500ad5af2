//! Gas payment method resolution.
//!
//! [`GasPaymentResolver`] is plain state owned by a task: it applies
//! eligibility results and decides the active method. [`EligibilityChecker`]
//! runs the async checks, debounced so rapid gas edits coalesce.

use alloy::primitives::Address;
use std::sync::Arc;

use crate::account::{Account, KeyringKind};
use crate::chain::{ChainId, ChainInfo};
use crate::config::schema::PaymentConfig;
use crate::observability::metrics;
use crate::payment::types::{
    GasAccountStatus, GasAccountUnavailable, GasPaymentMethod, GaslessStatus, GaslessUnavailable, PaymentError,
    PaymentResult,
};
use crate::resilience::Debouncer;
use crate::services::{
    Collaborators, GasAccountAuth, GasAccountCheck, GasAccountService, GaslessCheck, GaslessService, ServiceResult,
};
use crate::transaction::TransactionDraft;

#[derive(Debug, Clone)]
pub struct GasPaymentResolver {
    method: GasPaymentMethod,
    keyring: KeyringKind,
    has_custom_rpc: bool,
    chain_excluded: bool,
    logged_in: bool,
    gasless: GaslessStatus,
    gas_account: GasAccountStatus,
    /// Set once both first loads finished; never cleared.
    auto_switch_latched: bool,
    colorless_promotion_ids: Vec<String>,
    auto_switch_enabled: bool,
}

impl GasPaymentResolver {
    pub fn new(config: &PaymentConfig, account: &Account, chain: ChainId, has_custom_rpc: bool, logged_in: bool) -> Self {
        Self {
            method: GasPaymentMethod::Native,
            keyring: account.keyring,
            has_custom_rpc,
            chain_excluded: config.gas_account_excluded_chains.contains(&chain.0),
            logged_in,
            gasless: GaslessStatus::default(),
            gas_account: GasAccountStatus::default(),
            auto_switch_latched: false,
            colorless_promotion_ids: config.colorless_promotion_ids.clone(),
            auto_switch_enabled: config.auto_switch_to_gas_account,
        }
    }

    pub fn method(&self) -> GasPaymentMethod {
        self.method
    }

    pub fn gasless(&self) -> &GaslessStatus {
        &self.gasless
    }

    pub fn gas_account(&self) -> &GasAccountStatus {
        &self.gas_account
    }

    pub fn auto_switch_latched(&self) -> bool {
        self.auto_switch_latched
    }

    /// Account and chain conditions that rule sponsorship out without asking.
    pub fn gasless_precheck(&self) -> Result<(), GaslessUnavailable> {
        match self.keyring {
            KeyringKind::WatchOnly => return Err(GaslessUnavailable::WatchOnlyAccount),
            KeyringKind::WalletConnect => return Err(GaslessUnavailable::WalletConnectAccount),
            KeyringKind::Safe => return Err(GaslessUnavailable::MultisigAccount),
            KeyringKind::PrivateKey | KeyringKind::Mnemonic | KeyringKind::Hardware(_) => {}
        }
        if self.has_custom_rpc {
            return Err(GaslessUnavailable::CustomRpc);
        }
        Ok(())
    }

    /// Account and chain conditions that rule the gas account out without asking.
    pub fn gas_account_precheck(&self) -> Result<(), GasAccountUnavailable> {
        if !self.logged_in {
            return Err(GasAccountUnavailable::NotLoggedIn);
        }
        match self.keyring {
            KeyringKind::WatchOnly | KeyringKind::WalletConnect | KeyringKind::Safe => {
                return Err(GasAccountUnavailable::UnsupportedAccount)
            }
            KeyringKind::PrivateKey | KeyringKind::Mnemonic | KeyringKind::Hardware(_) => {}
        }
        if self.has_custom_rpc {
            return Err(GasAccountUnavailable::CustomRpc);
        }
        if self.chain_excluded {
            return Err(GasAccountUnavailable::ExcludedChain);
        }
        Ok(())
    }

    pub fn apply_gasless(&mut self, result: ServiceResult<GaslessCheck>) {
        let status = match result {
            Ok(mut check) => {
                if let Some(promotion) = check.promotion.as_mut() {
                    if self.colorless_promotion_ids.contains(&promotion.id) {
                        if let Some(config) = promotion.config.as_mut() {
                            config.theme_color.clear();
                            config.dark_color.clear();
                        }
                    }
                }
                GaslessStatus {
                    loaded: true,
                    can_use: check.is_gasless,
                    reason: (!check.is_gasless).then(|| GaslessUnavailable::NotSponsored(check.desc.clone())),
                    promotion: check.promotion,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Gasless eligibility check failed");
                GaslessStatus {
                    loaded: true,
                    can_use: false,
                    reason: Some(GaslessUnavailable::CheckFailed(e.to_string())),
                    promotion: None,
                }
            }
        };
        self.gasless = status;
        self.fall_back_if_unusable();
    }

    pub fn mark_gasless_unavailable(&mut self, reason: GaslessUnavailable) {
        self.gasless = GaslessStatus {
            loaded: true,
            can_use: false,
            reason: Some(reason),
            promotion: None,
        };
        self.fall_back_if_unusable();
    }

    pub fn apply_gas_account(&mut self, result: ServiceResult<GasAccountCheck>) {
        self.gas_account = match result {
            Ok(check) => {
                let reason = if check.chain_not_support {
                    Some(GasAccountUnavailable::ChainNotSupported)
                } else if !check.is_gas_account {
                    Some(GasAccountUnavailable::NotEligible)
                } else if !check.balance_is_enough {
                    Some(GasAccountUnavailable::InsufficientBalance)
                } else {
                    None
                };
                GasAccountStatus {
                    loaded: true,
                    check: Some(check),
                    reason,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Gas account balance check failed");
                GasAccountStatus {
                    loaded: true,
                    check: None,
                    reason: Some(GasAccountUnavailable::CheckFailed(e.to_string())),
                }
            }
        };
    }

    pub fn mark_gas_account_unavailable(&mut self, reason: GasAccountUnavailable) {
        self.gas_account = GasAccountStatus {
            loaded: true,
            check: None,
            reason: Some(reason),
        };
    }

    /// Sponsorship vanished under a task that had selected it.
    fn fall_back_if_unusable(&mut self) {
        if self.method == GasPaymentMethod::Gasless && !self.gasless.can_use {
            tracing::info!("Gasless no longer available, falling back to native gas");
            self.method = GasPaymentMethod::Native;
        }
    }

    pub fn first_load_done(&self) -> bool {
        self.gasless.loaded && self.gas_account.loaded
    }

    /// Both checks loaded and neither is sitting on an error.
    pub fn checks_settled(&self) -> bool {
        self.first_load_done() && !self.gasless.check_failed() && !self.gas_account.check_failed()
    }

    /// One-shot switch to the gas account when sponsorship is advertised but unusable.
    ///
    /// Evaluated once, the first time both checks have settled; later calls are no-ops
    /// so a manual switch back to native sticks.
    pub fn maybe_auto_switch(&mut self, gasless_advertised: bool) -> bool {
        if self.auto_switch_latched || !self.checks_settled() {
            return false;
        }
        self.auto_switch_latched = true;

        let switch = self.auto_switch_enabled
            && gasless_advertised
            && !self.gasless.can_use
            && self.gas_account.can_pay()
            && self.method == GasPaymentMethod::Native;
        if switch {
            self.method = GasPaymentMethod::GasAccount;
            metrics::record_auto_switch();
            tracing::info!("Switched gas payment to the gas account");
        }
        switch
    }

    /// User-driven method change.
    pub fn set_method(&mut self, method: GasPaymentMethod, signing: bool) -> PaymentResult<()> {
        if signing {
            return Err(PaymentError::SwitchWhileSigning);
        }
        match method {
            GasPaymentMethod::Native => {}
            GasPaymentMethod::Gasless => {
                if !self.gasless.can_use {
                    return Err(PaymentError::Unavailable {
                        method,
                        reason: format!("{:?}", self.gasless.reason),
                    });
                }
            }
            GasPaymentMethod::GasAccount => {
                if let Err(reason) = self.gas_account_precheck() {
                    return Err(PaymentError::Unavailable {
                        method,
                        reason: format!("{:?}", reason),
                    });
                }
            }
        }
        self.method = method;
        Ok(())
    }

    /// Why the active method cannot pay right now, if it cannot.
    pub fn blocker(&self) -> Option<String> {
        match self.method {
            GasPaymentMethod::Native => None,
            GasPaymentMethod::Gasless => (!self.gasless.can_use).then(|| format!("gasless: {:?}", self.gasless.reason)),
            GasPaymentMethod::GasAccount => {
                (!self.gas_account.can_pay()).then(|| format!("gas account: {:?}", self.gas_account.reason))
            }
        }
    }
}

/// Runs sponsorship and gas-account checks, coalescing bursts of re-checks.
#[derive(Clone)]
pub struct EligibilityChecker {
    gasless: Arc<dyn GaslessService>,
    gas_account: Arc<dyn GasAccountService>,
    gasless_debounce: Debouncer,
    gas_account_debounce: Debouncer,
}

impl EligibilityChecker {
    pub fn new(config: &PaymentConfig, deps: &Collaborators) -> Self {
        Self {
            gasless: deps.gasless.clone(),
            gas_account: deps.gas_account.clone(),
            gasless_debounce: Debouncer::from_millis(config.gasless_debounce_ms),
            gas_account_debounce: Debouncer::from_millis(config.gas_account_debounce_ms),
        }
    }

    /// `None` when a newer re-check superseded this one.
    pub async fn check_gasless(
        &self,
        chain: &ChainInfo,
        from: Address,
        batch: &[TransactionDraft],
        debounce: bool,
    ) -> Option<ServiceResult<GaslessCheck>> {
        let call = || self.gasless.check_eligibility(chain, from, batch);
        if debounce {
            self.gasless_debounce.run(call).await
        } else {
            Some(call().await)
        }
    }

    /// `None` when a newer re-check superseded this one.
    pub async fn check_gas_account(
        &self,
        chain: &ChainInfo,
        batch: &[TransactionDraft],
        auth: &GasAccountAuth,
        debounce: bool,
    ) -> Option<ServiceResult<GasAccountCheck>> {
        let call = || self.gas_account.check_balance(chain, batch, auth);
        if debounce {
            self.gas_account_debounce.run(call).await
        } else {
            Some(call().await)
        }
    }

    pub fn cancel(&self) {
        self.gasless_debounce.cancel();
        self.gas_account_debounce.cancel();
    }
}

impl std::fmt::Debug for EligibilityChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EligibilityChecker")
            .field("gasless_debounce", &self.gasless_debounce)
            .field("gas_account_debounce", &self.gas_account_debounce)
            .finish_non_exhaustive()
    }
}
