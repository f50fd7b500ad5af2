//! Co-owner confirmation collection for one Safe payload.

use alloy::primitives::{Address, Bytes};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::account::Account;
use crate::chain::ChainId;
use crate::multisig::types::{
    recommend_safe_nonce, MultisigError, MultisigResult, OwnerCandidate, SafeConfirmation, SafeInfo,
    SafeMultisigState, SafePayload, SafeProposal, SafeTransactionData,
};
use crate::services::MultisigBackend;
use crate::transaction::TransactionDraft;

/// Owners in on-chain order, each matched to the most capable local account.
///
/// Local accounts are ranked private key, mnemonic, hardware, WalletConnect,
/// watch-only; the first match per address wins. Unmatched owners are external.
pub fn build_candidates(owners: &[Address], local_accounts: &[Account]) -> Vec<OwnerCandidate> {
    let mut best: BTreeMap<Address, (u8, &Account)> = BTreeMap::new();
    for account in local_accounts {
        let Some(rank) = account.keyring.owner_preference() else {
            continue;
        };
        match best.get(&account.address) {
            Some((current, _)) if *current <= rank => {}
            _ => {
                best.insert(account.address, (rank, account));
            }
        }
    }

    let mut seen = Vec::with_capacity(owners.len());
    owners
        .iter()
        .filter(|owner| {
            if seen.contains(*owner) {
                return false;
            }
            seen.push(**owner);
            true
        })
        .map(|owner| match best.get(owner) {
            Some((_, account)) => OwnerCandidate {
                address: *owner,
                keyring: Some(account.keyring),
                alias: account.alias.clone(),
            },
            None => OwnerCandidate {
                address: *owner,
                keyring: None,
                alias: None,
            },
        })
        .collect()
}

fn owner_confirmations(owners: &[Address], confirmations: Vec<SafeConfirmation>) -> BTreeMap<Address, Bytes> {
    confirmations
        .into_iter()
        .filter(|c| owners.contains(&c.owner))
        .map(|c| (c.owner, c.signature))
        .collect()
}

#[derive(Clone)]
pub struct MultisigTracker {
    backend: Arc<dyn MultisigBackend>,
    state: SafeMultisigState,
    candidates: Vec<OwnerCandidate>,
    origin: Option<String>,
}

impl MultisigTracker {
    /// Load owners, threshold and any confirmations already collected for `payload`.
    pub async fn open(
        backend: Arc<dyn MultisigBackend>,
        chain: ChainId,
        safe: Address,
        payload: SafePayload,
        local_accounts: &[Account],
    ) -> MultisigResult<Self> {
        let info = backend.safe_info(chain, safe).await?;
        Self::load(backend, chain, info, payload, local_accounts).await
    }

    /// Propose `draft` from the Safe it is sent from, at the next usable Safe nonce.
    pub async fn open_for_draft(
        backend: Arc<dyn MultisigBackend>,
        draft: &TransactionDraft,
        local_accounts: &[Account],
    ) -> MultisigResult<Self> {
        let info = backend.safe_info(draft.chain_id, draft.from).await?;
        let nonce = recommend_safe_nonce(draft.nonce, info.nonce);
        let payload = SafePayload::transaction(SafeTransactionData::from_draft(draft, nonce), draft.chain_id, draft.from);
        Self::load(backend, draft.chain_id, info, payload, local_accounts).await
    }

    async fn load(
        backend: Arc<dyn MultisigBackend>,
        chain: ChainId,
        info: SafeInfo,
        payload: SafePayload,
        local_accounts: &[Account],
    ) -> MultisigResult<Self> {
        let safe = info.address;
        let existing = match &payload {
            SafePayload::Transaction { hash, .. } => backend.transaction_confirmations(chain, *hash).await?,
            SafePayload::Message { hash } => backend.message_confirmations(chain, *hash).await?,
        };

        let proposal_exists = existing.is_some();
        let confirmations = owner_confirmations(&info.owners, existing.unwrap_or_default());
        let candidates = build_candidates(&info.owners, local_accounts);

        tracing::info!(
            %safe,
            chain_id = %chain,
            hash = %payload.hash(),
            threshold = info.threshold,
            confirmations = confirmations.len(),
            "Opened safe confirmation tracker"
        );

        Ok(Self {
            backend,
            state: SafeMultisigState {
                chain,
                safe,
                owners: info.owners,
                threshold: info.threshold,
                payload,
                confirmations,
                proposal_exists,
            },
            candidates,
            origin: None,
        })
    }

    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }

    pub fn state(&self) -> &SafeMultisigState {
        &self.state
    }

    pub fn candidates(&self) -> &[OwnerCandidate] {
        &self.candidates
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Local owners that can still add a confirmation; empty once finished.
    pub fn pending_signers(&self) -> Vec<&OwnerCandidate> {
        if self.is_finished() {
            return Vec::new();
        }
        self.candidates
            .iter()
            .filter(|c| c.can_sign() && !self.state.is_confirmed_by(&c.address))
            .collect()
    }

    /// Re-read confirmations from the service.
    pub async fn refresh(&mut self) -> MultisigResult<()> {
        let existing = match &self.state.payload {
            SafePayload::Transaction { hash, .. } => {
                self.backend.transaction_confirmations(self.state.chain, *hash).await?
            }
            SafePayload::Message { hash } => self.backend.message_confirmations(self.state.chain, *hash).await?,
        };
        self.state.proposal_exists = existing.is_some();
        self.state.confirmations = owner_confirmations(&self.state.owners, existing.unwrap_or_default());
        Ok(())
    }

    /// Record `owner`'s signature: proposes on the first one, confirms afterwards.
    ///
    /// Returns whether the threshold is now met.
    pub async fn submit_signature(&mut self, owner: Address, signature: Bytes) -> MultisigResult<bool> {
        if self.is_finished() {
            return Err(MultisigError::Finished);
        }
        if !self.state.owners.contains(&owner) {
            return Err(MultisigError::NotOwner(owner));
        }
        if self.state.is_confirmed_by(&owner) {
            return Err(MultisigError::AlreadyConfirmed(owner));
        }

        let SafePayload::Transaction { data, hash } = &self.state.payload else {
            return Err(MultisigError::MessageReadOnly);
        };

        if self.state.proposal_exists {
            self.backend
                .add_confirmation(self.state.chain, *hash, signature.clone())
                .await?;
        } else {
            let proposal = SafeProposal {
                data: data.clone(),
                safe_tx_hash: *hash,
                sender: owner,
                signature: signature.clone(),
                origin: self.origin.clone(),
            };
            self.backend
                .post_transaction(self.state.chain, self.state.safe, &proposal)
                .await?;
            self.state.proposal_exists = true;
        }

        self.state.confirmations.insert(owner, signature);
        tracing::info!(
            safe = %self.state.safe,
            %owner,
            confirmations = self.state.confirmations.len(),
            threshold = self.state.threshold,
            "Safe confirmation added"
        );
        Ok(self.is_finished())
    }
}

impl std::fmt::Debug for MultisigTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultisigTracker")
            .field("state", &self.state)
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{HardwareVendor, KeyringKind};

    fn account(byte: u8, keyring: KeyringKind) -> Account {
        Account::new(Address::repeat_byte(byte), keyring)
    }

    #[test]
    fn test_candidates_prefer_most_capable_keyring() {
        let owners = [Address::repeat_byte(1), Address::repeat_byte(2), Address::repeat_byte(3)];
        let local = vec![
            account(1, KeyringKind::WatchOnly),
            account(1, KeyringKind::Hardware(HardwareVendor::Ledger)),
            account(1, KeyringKind::Mnemonic),
            account(2, KeyringKind::WalletConnect),
            account(9, KeyringKind::PrivateKey),
        ];

        let candidates = build_candidates(&owners, &local);
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].keyring, Some(KeyringKind::Mnemonic));
        assert_eq!(candidates[1].keyring, Some(KeyringKind::WalletConnect));
        assert!(candidates[2].is_external());
    }

    #[test]
    fn test_first_match_wins_on_equal_rank() {
        let owners = [Address::repeat_byte(1)];
        let mut first = account(1, KeyringKind::PrivateKey);
        first.alias = Some("first".to_string());
        let mut second = account(1, KeyringKind::PrivateKey);
        second.alias = Some("second".to_string());

        let candidates = build_candidates(&owners, &[first, second]);
        assert_eq!(candidates[0].alias.as_deref(), Some("first"));
    }

    #[test]
    fn test_safe_accounts_never_act_as_owners() {
        let owners = [Address::repeat_byte(1)];
        let candidates = build_candidates(&owners, &[account(1, KeyringKind::Safe)]);
        assert!(candidates[0].is_external());
        assert!(!candidates[0].can_sign());
    }

    #[test]
    fn test_confirmations_from_non_owners_dropped() {
        let owners = [Address::repeat_byte(1)];
        let confirmations = owner_confirmations(
            &owners,
            vec![
                SafeConfirmation {
                    owner: Address::repeat_byte(1),
                    signature: Bytes::from_static(&[1]),
                },
                SafeConfirmation {
                    owner: Address::repeat_byte(7),
                    signature: Bytes::from_static(&[7]),
                },
            ],
        );
        assert_eq!(confirmations.len(), 1);
    }
}
