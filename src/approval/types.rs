//! Approval task states, per-item progress and the snapshot handed to callers.

use alloy::primitives::{Address, TxHash, B256};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::account::Account;
use crate::chain::{ChainError, ChainId};
use crate::gas::{GasCheckCode, GasCheckError, GasCost, GasError, GasLevelKind, GasLimitPlan, GasRecommendation, LastGasSelection};
use crate::multisig::MultisigError;
use crate::payment::{GasAccountStatus, GasPaymentMethod, GaslessStatus, PaymentError};
use crate::security::SecurityVerdict;
use crate::services::{GasAccountAuth, SigningError, SimulationResult};
use crate::transaction::{NormalizeError, RawTransaction, RequestHints, TransactionDraft};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Idle,
    Prefetching,
    Signing,
    Submitted,
    Failed,
    /// Torn down by the user; never re-entered.
    Rejected,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Prefetching => "prefetching",
            TaskStatus::Signing => "signing",
            TaskStatus::Submitted => "submitted",
            TaskStatus::Failed => "failed",
            TaskStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Submitted | TaskStatus::Rejected)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where one batch entry is in signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemProgress {
    #[default]
    Idle,
    Built,
    Signed,
    Failed,
}

/// One batch entry with everything prefetch learned about it.
#[derive(Debug, Clone, Serialize)]
pub struct TxItem {
    pub draft: TransactionDraft,
    pub simulation: Option<SimulationResult>,
    pub recommendation: Option<GasRecommendation>,
    pub plan: Option<GasLimitPlan>,
    pub cost: Option<GasCost>,
    pub progress: ItemProgress,
    pub tx_hash: Option<TxHash>,
}

impl TxItem {
    pub fn new(draft: TransactionDraft) -> Self {
        Self {
            draft,
            simulation: None,
            recommendation: None,
            plan: None,
            cost: None,
            progress: ItemProgress::Idle,
            tx_hash: None,
        }
    }
}

/// A prefetch step that can fail on its own and be re-run alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchStep {
    Nonce,
    Balance,
    GasQuote,
    GasMedian,
    Simulation,
    GasCost,
    Security,
    Gasless,
    GasAccount,
}

/// Non-destructive notice about a failed backend read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefetchNotice {
    pub step: PrefetchStep,
    pub message: String,
}

/// Why an account may not approve at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CantProcessReason {
    WatchOnly,
}

/// Something that keeps the confirm action disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ConfirmBlocker {
    NotReady,
    CannotProcess { reason: CantProcessReason },
    SimulationFailed { index: usize },
    GasCheck { index: usize, code: GasCheckCode },
    SecurityPending,
    SecurityUnprocessed { rule_ids: Vec<String> },
    PaymentPending,
    PaymentUnavailable { reason: String },
    GasTooHigh,
}

/// Follow-up applied by `retry` after a classified signing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryHint {
    #[default]
    None,
    RefreshNonce,
    BumpFees,
}

impl RetryHint {
    pub fn for_error(error: &SigningError) -> Self {
        match error {
            SigningError::NonceTooLow(_) => RetryHint::RefreshNonce,
            SigningError::Underpriced(_) => RetryHint::BumpFees,
            _ => RetryHint::None,
        }
    }
}

/// Outcome of `confirm`, `retry` or a co-owner signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmProgress {
    Submitted { tx_hashes: Vec<TxHash> },
    /// Safe proposal open; these local owners may still sign.
    AwaitingCoOwners {
        safe_tx_hash: B256,
        pending_signers: Vec<Address>,
        confirmations: usize,
        threshold: u64,
    },
    /// A finished proposal for the same hash already existed.
    ReusedSignature { safe_tx_hash: B256 },
    /// Another confirm is in flight; nothing was done.
    AlreadySigning,
}

/// Everything needed to open a task.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub txs: Vec<RawTransaction>,
    pub chain: Option<ChainId>,
    pub hints: RequestHints,
    pub account: Account,
    pub origin: Option<String>,
    pub last_gas: Option<LastGasSelection>,
    /// Present when the user is logged into a gas account.
    pub gas_account_auth: Option<GasAccountAuth>,
    /// Local accounts that may co-sign for a Safe.
    pub local_accounts: Vec<Account>,
}

impl ApprovalRequest {
    pub fn new(txs: Vec<RawTransaction>, account: Account) -> Self {
        Self {
            txs,
            chain: None,
            hints: RequestHints::default(),
            account,
            origin: None,
            last_gas: None,
            gas_account_auth: None,
            local_accounts: Vec::new(),
        }
    }
}

/// Published on every state change.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub status: TaskStatus,
    pub ready: bool,
    pub items: Vec<TxItem>,
    pub gas_level: GasLevelKind,
    pub payment_method: GasPaymentMethod,
    pub gasless: GaslessStatus,
    pub gas_account: GasAccountStatus,
    pub gas_errors: Vec<GasCheckError>,
    pub security: SecurityVerdict,
    pub notices: Vec<PrefetchNotice>,
    pub blockers: Vec<ConfirmBlocker>,
    pub tx_hashes: Vec<TxHash>,
    pub error: Option<String>,
    pub retry_hint: RetryHint,
    /// Bumped on every gas or nonce edit.
    pub edit_revision: u64,
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("batch of {size} exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("cannot {action} while {status}")]
    InvalidState { action: &'static str, status: TaskStatus },

    #[error("confirm blocked: {0:?}")]
    Blocked(Vec<ConfirmBlocker>),

    #[error("no transaction at index {0}")]
    NoSuchItem(usize),

    #[error("transaction {0} replaces a pending nonce and cannot be renumbered")]
    NonceLocked(usize),

    #[error("safe accounts propose one transaction at a time")]
    MultisigBatch,

    #[error("task was rejected")]
    Rejected,

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Multisig(#[from] MultisigError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Gas(#[from] GasError),
}

pub type ApprovalResult<T> = Result<T, ApprovalError>;
