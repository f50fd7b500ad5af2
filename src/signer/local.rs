//! Private-key signing backend.
//!
//! # Security
//! - Keys come from a hex string or `APPROVAL_SIGNER_PRIVATE_KEY`
//! - Keys are never logged or serialized

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder, TransactionBuilder7702};
use alloy::primitives::{Address, Bytes, TxHash, B256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::chain::RpcRouter;
use crate::observability::metrics;
use crate::services::{SignOutcome, SignRequest, SigningBackend, SigningError, SigningResult};
use crate::transaction::{AuthorizationList, TransactionDraft};

/// Environment variable holding a hex private key.
pub const PRIVATE_KEY_ENV_VAR: &str = "APPROVAL_SIGNER_PRIVATE_KEY";

fn parse_key(private_key_hex: &str) -> SigningResult<PrivateKeySigner> {
    let key_hex = private_key_hex.strip_prefix("0x").unwrap_or(private_key_hex);
    key_hex
        .parse()
        .map_err(|e| SigningError::Backend(format!("Invalid private key format: {}", e)))
}

/// Signs with locally held keys and, when a router is attached, broadcasts.
#[derive(Clone, Default)]
pub struct LocalSigner {
    keys: HashMap<Address, PrivateKeySigner>,
    router: Option<Arc<RpcRouter>>,
}

impl LocalSigner {
    pub fn from_private_key(private_key_hex: &str) -> SigningResult<Self> {
        Self::default().with_key(private_key_hex)
    }

    pub fn from_env() -> SigningResult<Self> {
        let private_key = std::env::var(PRIVATE_KEY_ENV_VAR)
            .map_err(|_| SigningError::Backend(format!("Environment variable {} not set", PRIVATE_KEY_ENV_VAR)))?;
        Self::from_private_key(&private_key)
    }

    /// Add another key, e.g. a second Safe owner.
    pub fn with_key(mut self, private_key_hex: &str) -> SigningResult<Self> {
        let signer = parse_key(private_key_hex)?;
        tracing::info!(address = %signer.address(), "Signer key loaded");
        self.keys.insert(signer.address(), signer);
        Ok(self)
    }

    pub fn with_router(mut self, router: Arc<RpcRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.keys.keys().copied().collect()
    }

    fn key(&self, address: Address) -> SigningResult<&PrivateKeySigner> {
        self.keys.get(&address).ok_or(SigningError::UnknownSigner(address))
    }

    /// Build and sign the envelope for a fully priced draft.
    pub async fn sign_transaction(&self, draft: &TransactionDraft) -> SigningResult<(TxHash, Bytes)> {
        let key = self.key(draft.from)?;
        let nonce = draft
            .nonce
            .ok_or_else(|| SigningError::Backend("draft has no nonce".to_string()))?;
        let gas_limit = draft
            .gas_limit
            .ok_or_else(|| SigningError::Backend("draft has no gas limit".to_string()))?;

        let mut request = TransactionRequest::default()
            .with_from(draft.from)
            .with_chain_id(draft.chain_id.0)
            .with_nonce(nonce)
            .with_gas_limit(gas_limit)
            .with_value(draft.value)
            .with_input(draft.data.clone());

        request = match draft.to {
            Some(to) => request.with_to(to),
            None => request.into_create(),
        };

        request = match (draft.max_fee_per_gas, draft.max_priority_fee_per_gas, draft.gas_price) {
            (Some(max_fee), priority, _) => request
                .with_max_fee_per_gas(max_fee)
                .with_max_priority_fee_per_gas(priority.unwrap_or(max_fee)),
            (None, _, Some(price)) => request.with_gas_price(price),
            (None, _, None) => return Err(SigningError::Backend("draft has no gas price".to_string())),
        };

        match &draft.authorization_list {
            Some(AuthorizationList::Signed(list)) => request = request.with_authorization_list(list.clone()),
            Some(AuthorizationList::Unparsed(_)) => {
                return Err(SigningError::Backend("authorization list could not be parsed".to_string()))
            }
            None => {}
        }

        let wallet = EthereumWallet::from(key.clone());
        let envelope = request
            .build(&wallet)
            .await
            .map_err(|e| SigningError::Backend(e.to_string()))?;

        let hash = *envelope.tx_hash();
        Ok((hash, Bytes::from(envelope.encoded_2718())))
    }
}

#[async_trait]
impl SigningBackend for LocalSigner {
    async fn sign_and_submit(&self, request: SignRequest) -> SigningResult<SignOutcome> {
        let (tx_hash, raw) = self.sign_transaction(&request.draft).await?;

        let Some(router) = &self.router else {
            tracing::debug!(task_id = %request.task_id, index = request.index, %tx_hash, "Signed without broadcast");
            return Ok(SignOutcome { tx_hash, raw: Some(raw) });
        };

        let client = router
            .client(request.chain.id)
            .map_err(|e| SigningError::Broadcast(e.to_string()))?;
        match client.send_raw_transaction(raw.clone()).await {
            Ok(hash) => {
                tracing::info!(
                    task_id = %request.task_id,
                    index = request.index,
                    tx_hash = %hash,
                    payment = %request.payment_method,
                    "Transaction broadcast"
                );
                Ok(SignOutcome { tx_hash: hash, raw: Some(raw) })
            }
            Err(e) => {
                metrics::record_signing_attempt("broadcast_error");
                Err(SigningError::classify(&e.to_string()))
            }
        }
    }

    async fn sign_hash(&self, signer: Address, hash: B256) -> SigningResult<Bytes> {
        let signature = self
            .key(signer)?
            .sign_hash(&hash)
            .await
            .map_err(|e| SigningError::Backend(format!("Signing failed: {}", e)))?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("addresses", &self.addresses())
            .field("broadcast", &self.router.is_some())
            .finish()
    }
}
