//! External collaborators of the approval engine.
//!
//! # Responsibilities
//! - Define the async seams the engine calls out through (simulation, gas
//!   market, rule engine, sponsorship, gas account, signing, Safe service)
//! - Bundle them into [`Collaborators`] handed to every approval task
//!
//! # Design Decisions
//! - Object-safe `async_trait` traits behind `Arc<dyn _>` so hosts and tests
//!   swap implementations without generics leaking into the task type
//! - Chain-state reads take the chain id per call; one reader serves all chains

pub mod types;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::sync::Arc;

use crate::chain::{ChainId, ChainInfo, ChainRegistry};
use crate::gas::GasLevel;
use crate::multisig::{MultisigResult, SafeConfirmation, SafeInfo, SafeProposal};
use crate::pending::PendingTxStore;
use crate::security::RuleResult;
use crate::transaction::TransactionDraft;

pub use types::*;

/// Pre-executes transactions against current chain state.
#[async_trait]
pub trait SimulationService: Send + Sync {
    async fn pre_execute(
        &self,
        chain: &ChainInfo,
        tx: &TransactionDraft,
        pending: &[TransactionDraft],
    ) -> ServiceResult<SimulationResult>;
}

/// Gas price levels and chain-wide statistics.
#[async_trait]
pub trait GasMarketService: Send + Sync {
    /// Slow, normal, fast and custom levels; `custom_price` seeds the custom level.
    async fn quote(
        &self,
        chain: &ChainInfo,
        tx: &TransactionDraft,
        custom_price: Option<u128>,
    ) -> ServiceResult<Vec<GasLevel>>;

    async fn median_price(&self, chain: &ChainInfo) -> ServiceResult<Option<u128>>;
}

/// Gas actually used by earlier transactions of the same shape.
#[async_trait]
pub trait HistoryGasService: Send + Sync {
    async fn history_gas_used(&self, chain: &ChainInfo, tx: &TransactionDraft) -> ServiceResult<Option<u64>>;
}

/// L1 data fee for rollups, in wei.
#[async_trait]
pub trait L1FeeEstimator: Send + Sync {
    async fn l1_fee(&self, chain: &ChainInfo, tx: &TransactionDraft) -> ServiceResult<U256>;
}

#[async_trait]
pub trait ChainStateReader: Send + Sync {
    async fn transaction_count(&self, chain: ChainId, address: Address) -> ServiceResult<u64>;

    async fn balance(&self, chain: ChainId, address: Address) -> ServiceResult<U256>;
}

/// Evaluates risk rules; rule content is opaque to the engine.
#[async_trait]
pub trait SecurityRuleEngine: Send + Sync {
    async fn evaluate(&self, context: &SecurityContext) -> ServiceResult<Vec<RuleResult>>;
}

#[async_trait]
pub trait GaslessService: Send + Sync {
    async fn check_eligibility(
        &self,
        chain: &ChainInfo,
        from: Address,
        batch: &[TransactionDraft],
    ) -> ServiceResult<GaslessCheck>;
}

#[async_trait]
pub trait GasAccountService: Send + Sync {
    async fn check_balance(
        &self,
        chain: &ChainInfo,
        batch: &[TransactionDraft],
        auth: &GasAccountAuth,
    ) -> ServiceResult<GasAccountCheck>;
}

/// Signs and broadcasts; only called while a task is signing.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    async fn sign_and_submit(&self, request: SignRequest) -> SigningResult<SignOutcome>;

    /// Raw 65-byte signature over `hash` by `signer` (Safe owner confirmations).
    async fn sign_hash(&self, signer: Address, hash: B256) -> SigningResult<Bytes>;
}

/// Safe transaction service.
#[async_trait]
pub trait MultisigBackend: Send + Sync {
    async fn safe_info(&self, chain: ChainId, safe: Address) -> MultisigResult<SafeInfo>;

    /// Confirmations of a proposal; `None` when no proposal exists for the hash.
    async fn transaction_confirmations(
        &self,
        chain: ChainId,
        safe_tx_hash: B256,
    ) -> MultisigResult<Option<Vec<SafeConfirmation>>>;

    /// Confirmations of an off-chain Safe message.
    async fn message_confirmations(
        &self,
        chain: ChainId,
        message_hash: B256,
    ) -> MultisigResult<Option<Vec<SafeConfirmation>>>;

    async fn post_transaction(&self, chain: ChainId, safe: Address, proposal: &SafeProposal) -> MultisigResult<()>;

    async fn add_confirmation(&self, chain: ChainId, safe_tx_hash: B256, signature: Bytes) -> MultisigResult<()>;
}

/// Everything an approval task talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub chains: Arc<dyn ChainRegistry>,
    pub chain_state: Arc<dyn ChainStateReader>,
    pub simulation: Arc<dyn SimulationService>,
    pub gas_market: Arc<dyn GasMarketService>,
    pub history_gas: Arc<dyn HistoryGasService>,
    pub l1_fees: Arc<dyn L1FeeEstimator>,
    pub security_rules: Arc<dyn SecurityRuleEngine>,
    pub gasless: Arc<dyn GaslessService>,
    pub gas_account: Arc<dyn GasAccountService>,
    pub signer: Arc<dyn SigningBackend>,
    pub multisig: Option<Arc<dyn MultisigBackend>>,
    pub pending: PendingTxStore,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("multisig", &self.multisig.is_some())
            .field("pending", &self.pending.count())
            .finish_non_exhaustive()
    }
}
