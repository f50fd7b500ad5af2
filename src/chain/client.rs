//! Chain RPC client with timeout and failover handling.
//!
//! # Responsibilities
//! - Connect to the JSON-RPC endpoints of one chain (primary + failovers)
//! - Query sender state (nonce, balance) and the node gas price
//! - Broadcast signed raw transactions
//! - Route per-chain reads for the approval engine through [`RpcRouter`]

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::transports::TransportResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::chain::types::{ChainConfig, ChainError, ChainId, ChainResult};
use crate::services::{ChainStateReader, ServiceResult};

/// RPC client wrapper with failover support.
#[derive(Clone)]
pub struct RpcClient {
    /// List of providers (primary + failovers).
    providers: Vec<Arc<dyn Provider + Send + Sync>>,
    chain_id: ChainId,
    rpc_url: String,
    /// Request timeout duration.
    timeout_duration: Duration,
}

impl RpcClient {
    /// Create a new client for the given chain entry.
    ///
    /// Fails only when the primary URL is missing or malformed; an
    /// unreachable node is logged and left to per-call failover.
    pub async fn new(config: &ChainConfig) -> ChainResult<Self> {
        let rpc_url = config
            .rpc_url
            .clone()
            .ok_or_else(|| ChainError::NotAvailable(format!("no rpc_url for chain {}", config.chain_id)))?;
        let timeout_duration = Duration::from_secs(config.rpc_timeout_secs);
        let mut providers = Vec::new();

        let primary_url: url::Url = rpc_url
            .parse()
            .map_err(|e| ChainError::Rpc(format!("Invalid RPC URL '{}': {}", rpc_url, e)))?;
        providers.push(Arc::new(ProviderBuilder::new().connect_http(primary_url)) as Arc<dyn Provider + Send + Sync>);

        for url_str in &config.failover_urls {
            if let Ok(url) = url_str.parse::<url::Url>() {
                providers.push(Arc::new(ProviderBuilder::new().connect_http(url)) as Arc<dyn Provider + Send + Sync>);
            } else {
                tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL");
            }
        }

        let client = Self {
            providers,
            chain_id: ChainId(config.chain_id),
            rpc_url,
            timeout_duration,
        };

        match client.verify_chain_id().await {
            Ok(()) => {
                tracing::info!(
                    rpc_url = %client.rpc_url,
                    chain_id = config.chain_id,
                    "RPC client initialized"
                );
            }
            Err(e) => {
                tracing::warn!(
                    chain_id = config.chain_id,
                    error = %e,
                    "RPC client initialized but chain verification failed"
                );
            }
        }

        Ok(client)
    }

    /// Verify the connected chain ID matches configuration.
    pub async fn verify_chain_id(&self) -> ChainResult<()> {
        let chain_id = self.get_chain_id().await?;
        if chain_id != self.chain_id {
            return Err(ChainError::ChainMismatch {
                expected: self.chain_id.0,
                actual: chain_id.0,
            });
        }
        Ok(())
    }

    /// Run one RPC call against each provider in order until one answers.
    async fn with_failover<T, F, Fut>(&self, op: &'static str, call: F) -> ChainResult<T>
    where
        F: Fn(Arc<dyn Provider + Send + Sync>) -> Fut + Send + Sync,
        Fut: Future<Output = TransportResult<T>> + Send,
        T: Send,
    {
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, call(provider.clone())).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => {
                    tracing::warn!(provider_idx = i, op, error = %e, "RPC error, trying next provider");
                }
                Err(_) => {
                    tracing::warn!(provider_idx = i, op, "RPC timeout, trying next provider");
                }
            }
        }
        Err(ChainError::Rpc(format!("All RPC providers failed to {}", op)))
    }

    /// Get the chain ID from the RPC.
    pub async fn get_chain_id(&self) -> ChainResult<ChainId> {
        self.with_failover("get chain id", |p| async move { p.get_chain_id().await })
            .await
            .map(ChainId)
    }

    /// Get the balance of an address.
    pub async fn get_balance(&self, address: Address) -> ChainResult<U256> {
        self.with_failover("get balance", |p| async move { p.get_balance(address).await })
            .await
    }

    /// Get the transaction count (nonce) for an address.
    pub async fn get_transaction_count(&self, address: Address) -> ChainResult<u64> {
        self.with_failover("get transaction count", |p| async move {
            p.get_transaction_count(address).await
        })
        .await
    }

    /// Get current gas price in wei.
    pub async fn get_gas_price(&self) -> ChainResult<u128> {
        self.with_failover("get gas price", |p| async move { p.get_gas_price().await })
            .await
    }

    /// Broadcast an EIP-2718 encoded signed transaction.
    pub async fn send_raw_transaction(&self, raw: Bytes) -> ChainResult<TxHash> {
        self.with_failover("send raw transaction", |p| {
            let raw = raw.clone();
            async move {
                p.send_raw_transaction(&raw)
                    .await
                    .map(|pending| *pending.tx_hash())
            }
        })
        .await
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("providers", &self.providers.len())
            .field("timeout", &self.timeout_duration)
            .finish()
    }
}

/// Per-chain client map serving the engine's chain-state reads.
#[derive(Debug, Clone, Default)]
pub struct RpcRouter {
    clients: HashMap<ChainId, RpcClient>,
}

impl RpcRouter {
    /// Build clients for every chain entry that carries an RPC URL.
    pub async fn from_config(chains: &[ChainConfig]) -> ChainResult<Self> {
        let mut clients = HashMap::new();
        for chain in chains.iter().filter(|c| c.rpc_url.is_some()) {
            let client = RpcClient::new(chain).await?;
            clients.insert(client.chain_id(), client);
        }
        Ok(Self { clients })
    }

    pub fn client(&self, chain: ChainId) -> ChainResult<&RpcClient> {
        self.clients
            .get(&chain)
            .ok_or_else(|| ChainError::NotAvailable(format!("no RPC client for chain {}", chain)))
    }
}

#[async_trait]
impl ChainStateReader for RpcRouter {
    async fn transaction_count(&self, chain: ChainId, address: Address) -> ServiceResult<u64> {
        Ok(self.client(chain)?.get_transaction_count(address).await?)
    }

    async fn balance(&self, chain: ChainId, address: Address) -> ServiceResult<U256> {
        Ok(self.client(chain)?.get_balance(address).await?)
    }
}
