//! Safe accounts, payloads and co-owner confirmations.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolStruct};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::account::KeyringKind;
use crate::chain::ChainId;
use crate::services::SigningError;
use crate::transaction::TransactionDraft;

sol! {
    /// EIP-712 message a Safe owner signs.
    #[derive(Debug, PartialEq, Eq)]
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }
}

/// Safe state as reported by the transaction service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeInfo {
    pub address: Address,
    pub owners: Vec<Address>,
    pub threshold: u64,
    pub nonce: u64,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeConfirmation {
    pub owner: Address,
    pub signature: Bytes,
}

/// Call executed by the Safe; only `CALL` is proposed from approvals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeTransactionData {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: u8,
    pub safe_tx_gas: U256,
    pub base_gas: U256,
    pub gas_price: U256,
    pub gas_token: Address,
    pub refund_receiver: Address,
    pub nonce: u64,
}

impl SafeTransactionData {
    /// Wrap a draft sent from the Safe; gas is paid by the executing owner.
    pub fn from_draft(draft: &TransactionDraft, nonce: u64) -> Self {
        Self {
            to: draft.to.unwrap_or(Address::ZERO),
            value: draft.value,
            data: draft.data.clone(),
            operation: 0,
            safe_tx_gas: U256::ZERO,
            base_gas: U256::ZERO,
            gas_price: U256::ZERO,
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
            nonce,
        }
    }

    fn to_sol(&self) -> SafeTx {
        SafeTx {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation,
            safeTxGas: self.safe_tx_gas,
            baseGas: self.base_gas,
            gasPrice: self.gas_price,
            gasToken: self.gas_token,
            refundReceiver: self.refund_receiver,
            nonce: U256::from(self.nonce),
        }
    }

    /// `safeTxHash`: EIP-712 hash under the `(chainId, verifyingContract)` domain.
    pub fn safe_tx_hash(&self, chain: ChainId, safe: Address) -> B256 {
        let domain = Eip712Domain::new(None, None, Some(U256::from(chain.0)), Some(safe), None);
        self.to_sol().eip712_signing_hash(&domain)
    }
}

/// Draft nonce if it is not already used on the Safe, else the Safe's own.
pub fn recommend_safe_nonce(draft_nonce: Option<u64>, safe_nonce: u64) -> u64 {
    match draft_nonce {
        Some(n) if n >= safe_nonce => n,
        _ => safe_nonce,
    }
}

/// What the owners are confirming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafePayload {
    Transaction { data: SafeTransactionData, hash: B256 },
    /// Off-chain message; only its confirmations are looked up.
    Message { hash: B256 },
}

impl SafePayload {
    pub fn transaction(data: SafeTransactionData, chain: ChainId, safe: Address) -> Self {
        let hash = data.safe_tx_hash(chain, safe);
        SafePayload::Transaction { data, hash }
    }

    pub fn hash(&self) -> B256 {
        match self {
            SafePayload::Transaction { hash, .. } | SafePayload::Message { hash } => *hash,
        }
    }
}

/// New proposal carrying the first owner signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeProposal {
    pub data: SafeTransactionData,
    pub safe_tx_hash: B256,
    pub sender: Address,
    pub signature: Bytes,
    pub origin: Option<String>,
}

/// A Safe owner and the local account that can sign for it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerCandidate {
    pub address: Address,
    /// `None` for owners with no local account.
    pub keyring: Option<KeyringKind>,
    pub alias: Option<String>,
}

impl OwnerCandidate {
    pub fn is_external(&self) -> bool {
        self.keyring.is_none()
    }

    pub fn can_sign(&self) -> bool {
        self.keyring.map(|k| k.can_sign()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeMultisigState {
    pub chain: ChainId,
    pub safe: Address,
    pub owners: Vec<Address>,
    pub threshold: u64,
    pub payload: SafePayload,
    /// Owner → signature.
    pub confirmations: BTreeMap<Address, Bytes>,
    /// A proposal for this hash already exists on the service.
    pub proposal_exists: bool,
}

impl SafeMultisigState {
    pub fn is_finished(&self) -> bool {
        self.confirmations.len() as u64 >= self.threshold
    }

    pub fn is_confirmed_by(&self, owner: &Address) -> bool {
        self.confirmations.contains_key(owner)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MultisigError {
    #[error("safe service request failed: {0}")]
    Request(String),

    #[error("safe service returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid safe service response: {0}")]
    InvalidResponse(String),

    #[error("no safe transaction service for chain {0}")]
    UnsupportedChain(ChainId),

    #[error("{0} is not an owner of this safe")]
    NotOwner(Address),

    #[error("{0} already confirmed")]
    AlreadyConfirmed(Address),

    #[error("threshold already reached")]
    Finished,

    #[error("message confirmations are read-only")]
    MessageReadOnly,

    #[error("no multisig backend configured")]
    NotConfigured,

    #[error(transparent)]
    Signing(#[from] SigningError),
}

pub type MultisigResult<T> = Result<T, MultisigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, keccak256};
    use alloy::sol_types::SolStruct;

    #[test]
    fn test_safe_tx_type_string() {
        assert_eq!(
            SafeTx::eip712_encode_type(),
            "SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)"
        );
    }

    #[test]
    fn test_hash_depends_on_domain() {
        let safe = address!("1111111111111111111111111111111111111111");
        let mut draft = TransactionDraft::new(ChainId(1), safe, Some(address!("2222222222222222222222222222222222222222")));
        draft.value = U256::from(1u64);
        let data = SafeTransactionData::from_draft(&draft, 3);

        let mainnet = data.safe_tx_hash(ChainId(1), safe);
        assert_eq!(mainnet, data.safe_tx_hash(ChainId(1), safe));
        assert_ne!(mainnet, data.safe_tx_hash(ChainId(5), safe));
        assert_ne!(mainnet, SafeTransactionData::from_draft(&draft, 4).safe_tx_hash(ChainId(1), safe));
    }

    #[test]
    fn test_domain_separator_matches_safe_layout() {
        let safe = address!("1111111111111111111111111111111111111111");
        let domain = Eip712Domain::new(None, None, Some(U256::from(1u64)), Some(safe), None);

        let mut encoded = Vec::new();
        encoded.extend_from_slice(keccak256("EIP712Domain(uint256 chainId,address verifyingContract)").as_slice());
        encoded.extend_from_slice(&U256::from(1u64).to_be_bytes::<32>());
        encoded.extend_from_slice(safe.into_word().as_slice());
        assert_eq!(domain.separator(), keccak256(encoded));
    }

    #[test]
    fn test_safe_nonce_recommendation() {
        assert_eq!(recommend_safe_nonce(None, 7), 7);
        assert_eq!(recommend_safe_nonce(Some(3), 7), 7);
        assert_eq!(recommend_safe_nonce(Some(9), 7), 9);
    }

    #[test]
    fn test_finished_at_threshold() {
        let mut state = SafeMultisigState {
            chain: ChainId(1),
            safe: Address::ZERO,
            owners: vec![Address::repeat_byte(1), Address::repeat_byte(2)],
            threshold: 2,
            payload: SafePayload::Message { hash: B256::ZERO },
            confirmations: BTreeMap::new(),
            proposal_exists: false,
        };
        state.confirmations.insert(Address::repeat_byte(1), Bytes::new());
        assert!(!state.is_finished());
        state.confirmations.insert(Address::repeat_byte(2), Bytes::new());
        assert!(state.is_finished());
    }
}
