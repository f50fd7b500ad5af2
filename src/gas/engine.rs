//! Async front of the gas engine: sources recommendations, nonces and costs
//! from collaborators, then defers to the pure functions of this module.

use alloy::primitives::{Address, U256};
use std::sync::Arc;

use crate::chain::{ChainId, ChainInfo};
use crate::config::schema::{EngineConfig, GasConfig, RetryConfig};
use crate::gas::check::{check_gas_and_nonce, GasCheckItem, GasCheckParams};
use crate::gas::explain::{compute_gas_cost, PreparedL1Fee};
use crate::gas::nonce::merge_nonce;
use crate::gas::recommend::{calc_gas_limit, recommend_from_history, recommend_from_request, GasLimitInputs};
use crate::gas::types::{GasCheckError, GasCost, GasError, GasLimitPlan, GasRecommendation, GasResult};
use crate::pending::PendingTxStore;
use crate::resilience::retry_with_backoff;
use crate::services::{ChainStateReader, Collaborators, HistoryGasService, L1FeeEstimator, ServiceError};
use crate::transaction::TransactionDraft;

/// Inputs of [`GasEngine::explain_gas`].
#[derive(Debug, Clone)]
pub struct ExplainGas<'a> {
    pub chain: &'a ChainInfo,
    pub tx: &'a TransactionDraft,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub native_token_price: f64,
    /// Fee already being fetched for this transaction.
    pub prepared_l1_fee: Option<PreparedL1Fee>,
}

#[derive(Clone)]
pub struct GasEngine {
    config: GasConfig,
    retry: RetryConfig,
    chain_state: Arc<dyn ChainStateReader>,
    history: Arc<dyn HistoryGasService>,
    l1_fees: Arc<dyn L1FeeEstimator>,
    pending: PendingTxStore,
}

impl GasEngine {
    pub fn new(config: &EngineConfig, deps: &Collaborators) -> Self {
        Self {
            config: config.gas.clone(),
            retry: config.resilience.clone(),
            chain_state: deps.chain_state.clone(),
            history: deps.history_gas.clone(),
            l1_fees: deps.l1_fees.clone(),
            pending: deps.pending.clone(),
        }
    }

    pub fn config(&self) -> &GasConfig {
        &self.config
    }

    /// Estimate, then the draft's own limit, then history, then the fallback.
    /// History failures fall through to the fallback.
    pub async fn recommend_gas(
        &self,
        chain: &ChainInfo,
        tx: &TransactionDraft,
        estimated_gas: u64,
        gas_used: u64,
    ) -> GasRecommendation {
        if let Some(rec) = recommend_from_request(estimated_gas, gas_used, tx) {
            return rec;
        }

        let history = match self.history.history_gas_used(chain, tx).await {
            Ok(sample) => sample,
            Err(e) => {
                tracing::debug!(chain_id = %chain.id, error = %e, "History gas lookup failed, using fallback");
                None
            }
        };
        recommend_from_history(history, self.config.fallback_gas_limit)
    }

    /// `max(on-chain nonce, highest local pending + 1)`.
    pub async fn recommend_nonce(&self, from: Address, chain: ChainId) -> GasResult<u64> {
        let on_chain = retry_with_backoff(
            &self.retry,
            "transaction count",
            || self.chain_state.transaction_count(chain, from),
            ServiceError::is_transient,
        )
        .await?;

        self.pending.mark_confirmed(from, chain, on_chain);
        let local = self.pending.pending_nonce(from, chain);
        let nonce = merge_nonce(on_chain, local);

        tracing::debug!(%from, chain_id = %chain, on_chain, ?local, nonce, "Nonce recommended");
        Ok(nonce)
    }

    pub async fn native_balance(&self, from: Address, chain: ChainId) -> GasResult<U256> {
        let balance = retry_with_backoff(
            &self.retry,
            "balance",
            || self.chain_state.balance(chain, from),
            ServiceError::is_transient,
        )
        .await?;
        Ok(balance)
    }

    /// Start the L1 fee fetch for a transaction on chains that charge one.
    pub fn prepare_l1_fee(&self, chain: &ChainInfo, tx: &TransactionDraft) -> Option<PreparedL1Fee> {
        if !chain.l1_fee_estimation {
            return None;
        }

        let estimator = self.l1_fees.clone();
        let retry = self.retry.clone();
        let chain = chain.clone();
        let tx = tx.clone();
        Some(PreparedL1Fee::pending(async move {
            retry_with_backoff(
                &retry,
                "l1 fee",
                || estimator.l1_fee(&chain, &tx),
                ServiceError::is_transient,
            )
            .await
        }))
    }

    /// Expected, worst-case and USD cost of one transaction.
    pub async fn explain_gas(&self, req: ExplainGas<'_>) -> GasResult<GasCost> {
        let l1_fee = if req.chain.l1_fee_estimation {
            match req.prepared_l1_fee.or_else(|| self.prepare_l1_fee(req.chain, req.tx)) {
                Some(prepared) => prepared.resolve().await.map_err(GasError::L1Fee)?,
                None => U256::ZERO,
            }
        } else {
            U256::ZERO
        };

        Ok(compute_gas_cost(
            req.gas_used,
            req.gas_limit,
            req.gas_price,
            l1_fee,
            req.native_token_price,
        ))
    }

    /// Gas limit for a draft given its recommendation.
    pub fn plan_gas_limit(
        &self,
        chain: &ChainInfo,
        tx: &TransactionDraft,
        recommendation: GasRecommendation,
        simulation_ratio: Option<f64>,
        balance: Option<U256>,
        is_multisig: bool,
    ) -> GasLimitPlan {
        calc_gas_limit(&GasLimitInputs {
            recommendation,
            ratio: simulation_ratio.unwrap_or_else(|| self.config.ratio_for(chain.id.0)),
            requested_gas_limit: tx.gas_limit,
            fee_cap: tx.fee_cap(),
            value: tx.value,
            balance,
            is_multisig,
        })
    }

    /// Gas, balance and nonce checks with this engine's thresholds.
    pub fn check(&self, chain: &ChainInfo, items: &[GasCheckItem<'_>], balance: U256, is_multisig: bool) -> Vec<GasCheckError> {
        check_gas_and_nonce(
            items,
            balance,
            &GasCheckParams {
                ratio: self.config.ratio_for(chain.id.0),
                default_ratio: self.config.default_gas_limit_ratio,
                min_gas_limit: self.config.min_gas_limit,
                is_multisig,
            },
        )
    }
}

impl std::fmt::Debug for GasEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GasEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
