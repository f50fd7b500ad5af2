//! HTTP client for the Safe transaction service.

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::chain::ChainId;
use crate::config::schema::SafeConfig;
use crate::multisig::types::{MultisigError, MultisigResult, SafeConfirmation, SafeInfo, SafeProposal};
use crate::services::MultisigBackend;

/// The service reports counters either as JSON numbers or decimal strings.
fn u64_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.parse().map_err(de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct SafeInfoResponse {
    address: Address,
    #[serde(deserialize_with = "u64_from_number_or_string")]
    nonce: u64,
    #[serde(deserialize_with = "u64_from_number_or_string")]
    threshold: u64,
    owners: Vec<Address>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfirmationsResponse {
    #[serde(default)]
    confirmations: Vec<ConfirmationEntry>,
}

#[derive(Debug, Deserialize)]
struct ConfirmationEntry {
    owner: Address,
    signature: Option<Bytes>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProposeBody {
    to: Address,
    value: String,
    data: Option<Bytes>,
    operation: u8,
    safe_tx_gas: String,
    base_gas: String,
    gas_price: String,
    gas_token: Address,
    refund_receiver: Address,
    nonce: u64,
    contract_transaction_hash: B256,
    sender: Address,
    signature: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<String>,
}

impl From<&SafeProposal> for ProposeBody {
    fn from(p: &SafeProposal) -> Self {
        Self {
            to: p.data.to,
            value: p.data.value.to_string(),
            data: (!p.data.data.is_empty()).then(|| p.data.data.clone()),
            operation: p.data.operation,
            safe_tx_gas: p.data.safe_tx_gas.to_string(),
            base_gas: p.data.base_gas.to_string(),
            gas_price: p.data.gas_price.to_string(),
            gas_token: p.data.gas_token,
            refund_receiver: p.data.refund_receiver,
            nonce: p.data.nonce,
            contract_transaction_hash: p.safe_tx_hash,
            sender: p.sender,
            signature: p.signature.clone(),
            origin: p.origin.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ConfirmBody {
    signature: Bytes,
}

/// One base URL per chain, e.g. `https://safe-transaction-mainnet.safe.global/api`.
#[derive(Debug, Clone)]
pub struct SafeServiceClient {
    http: reqwest::Client,
    endpoints: HashMap<u64, String>,
}

impl SafeServiceClient {
    pub fn new(config: &SafeConfig) -> MultisigResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| MultisigError::Request(e.to_string()))?;

        let endpoints = config
            .services
            .iter()
            .map(|s| (s.chain_id, s.url.trim_end_matches('/').to_string()))
            .collect();

        Ok(Self { http, endpoints })
    }

    pub fn with_endpoint(mut self, chain: ChainId, url: impl Into<String>) -> Self {
        let url = url.into();
        self.endpoints.insert(chain.0, url.trim_end_matches('/').to_string());
        self
    }

    fn base(&self, chain: ChainId) -> MultisigResult<&str> {
        self.endpoints
            .get(&chain.0)
            .map(String::as_str)
            .ok_or(MultisigError::UnsupportedChain(chain))
    }

    /// `None` on 404.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> MultisigResult<Option<T>> {
        tracing::debug!(url, "GET safe service");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| MultisigError::Request(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MultisigError::Http {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<T>()
            .await
            .map(Some)
            .map_err(|e| MultisigError::InvalidResponse(e.to_string()))
    }

    async fn post_json<B: Serialize>(&self, url: &str, body: &B) -> MultisigResult<()> {
        tracing::debug!(url, "POST safe service");
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| MultisigError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MultisigError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn confirmations(resp: Option<ConfirmationsResponse>) -> Option<Vec<SafeConfirmation>> {
        resp.map(|r| {
            r.confirmations
                .into_iter()
                .filter_map(|c| {
                    c.signature.map(|signature| SafeConfirmation {
                        owner: c.owner,
                        signature,
                    })
                })
                .collect()
        })
    }
}

#[async_trait]
impl MultisigBackend for SafeServiceClient {
    async fn safe_info(&self, chain: ChainId, safe: Address) -> MultisigResult<SafeInfo> {
        let url = format!("{}/v1/safes/{}/", self.base(chain)?, safe);
        let info: SafeInfoResponse = self
            .get_json(&url)
            .await?
            .ok_or_else(|| MultisigError::InvalidResponse(format!("safe {safe} not found on chain {chain}")))?;

        Ok(SafeInfo {
            address: info.address,
            owners: info.owners,
            threshold: info.threshold,
            nonce: info.nonce,
            version: info.version,
        })
    }

    async fn transaction_confirmations(
        &self,
        chain: ChainId,
        safe_tx_hash: B256,
    ) -> MultisigResult<Option<Vec<SafeConfirmation>>> {
        let url = format!("{}/v1/multisig-transactions/{}/", self.base(chain)?, safe_tx_hash);
        Ok(Self::confirmations(self.get_json(&url).await?))
    }

    async fn message_confirmations(
        &self,
        chain: ChainId,
        message_hash: B256,
    ) -> MultisigResult<Option<Vec<SafeConfirmation>>> {
        let url = format!("{}/v1/messages/{}/", self.base(chain)?, message_hash);
        Ok(Self::confirmations(self.get_json(&url).await?))
    }

    async fn post_transaction(&self, chain: ChainId, safe: Address, proposal: &SafeProposal) -> MultisigResult<()> {
        let url = format!("{}/v1/safes/{}/multisig-transactions/", self.base(chain)?, safe);
        self.post_json(&url, &ProposeBody::from(proposal)).await
    }

    async fn add_confirmation(&self, chain: ChainId, safe_tx_hash: B256, signature: Bytes) -> MultisigResult<()> {
        let url = format!(
            "{}/v1/multisig-transactions/{}/confirmations/",
            self.base(chain)?,
            safe_tx_hash
        );
        self.post_json(&url, &ConfirmBody { signature }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_info_accepts_string_counters() {
        let info: SafeInfoResponse = serde_json::from_str(
            r#"{"address":"0x1111111111111111111111111111111111111111","nonce":"12","threshold":2,
                "owners":["0x2222222222222222222222222222222222222222"],"version":"1.3.0"}"#,
        )
        .unwrap();
        assert_eq!(info.nonce, 12);
        assert_eq!(info.threshold, 2);
    }

    #[test]
    fn test_unsigned_confirmations_skipped() {
        let resp: ConfirmationsResponse = serde_json::from_str(
            r#"{"confirmations":[
                {"owner":"0x2222222222222222222222222222222222222222","signature":"0x01"},
                {"owner":"0x3333333333333333333333333333333333333333","signature":null}]}"#,
        )
        .unwrap();
        let confirmations = SafeServiceClient::confirmations(Some(resp)).unwrap();
        assert_eq!(confirmations.len(), 1);
        assert!(SafeServiceClient::confirmations(None).is_none());
    }

    #[test]
    fn test_unknown_chain_rejected() {
        let client = SafeServiceClient::new(&SafeConfig::default()).unwrap();
        assert!(client.base(ChainId(1)).is_ok());
        assert_eq!(client.base(ChainId(42)), Err(MultisigError::UnsupportedChain(ChainId(42))));

        let client = client.with_endpoint(ChainId(42), "http://127.0.0.1:9/api/");
        assert_eq!(client.base(ChainId(42)).unwrap(), "http://127.0.0.1:9/api");
    }
}
