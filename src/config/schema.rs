//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Gas-limit ratio applied when the chain has no override.
pub const DEFAULT_GAS_LIMIT_RATIO: f64 = 1.5;

/// Lowest gas limit a plain transfer can run with.
pub const MINIMUM_GAS_LIMIT: u64 = 21_000;

/// Root configuration for the approval engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Gas recommendation and checks.
    pub gas: GasConfig,

    /// Gas payment method resolution.
    pub payment: PaymentConfig,

    /// Security verdict aggregation.
    pub security: SecurityConfig,

    /// Approval task gating.
    pub approval: ApprovalConfig,

    /// Retry configuration for transient backend failures.
    pub resilience: RetryConfig,

    /// Chain registry entries.
    pub chains: Vec<ChainConfig>,

    /// Safe transaction service endpoints.
    pub safe: SafeConfig,

    /// Pending transaction store.
    pub pending: PendingConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Per-chain gas-limit ratio override.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChainGasRatio {
    pub chain_id: u64,
    pub ratio: f64,
}

/// Gas recommendation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GasConfig {
    /// Safety multiplier for recommended gas limits.
    pub default_gas_limit_ratio: f64,

    /// Absolute minimum gas limit (non-Safe accounts).
    pub min_gas_limit: u64,

    /// Gas limit used when neither an estimate nor history is available.
    pub fallback_gas_limit: u64,

    /// Chains that need a different safety multiplier.
    pub chain_ratios: Vec<ChainGasRatio>,

    /// Fee multiplier applied when retrying an underpriced submission.
    pub retry_fee_bump: f64,

    /// Refuse to sign when the USD gas cost exceeds the thresholds below.
    pub gas_too_high_guard: bool,

    /// USD threshold on Ethereum mainnet.
    pub gas_too_high_usd_mainnet: f64,

    /// USD threshold on every other chain.
    pub gas_too_high_usd_other: f64,
}

impl GasConfig {
    /// Effective gas-limit ratio for a chain.
    pub fn ratio_for(&self, chain_id: u64) -> f64 {
        self.chain_ratios
            .iter()
            .find(|r| r.chain_id == chain_id)
            .map(|r| r.ratio)
            .unwrap_or(self.default_gas_limit_ratio)
    }
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            default_gas_limit_ratio: DEFAULT_GAS_LIMIT_RATIO,
            min_gas_limit: MINIMUM_GAS_LIMIT,
            fallback_gas_limit: 1_000_000,
            chain_ratios: Vec::new(),
            retry_fee_bump: 1.3,
            gas_too_high_guard: false,
            gas_too_high_usd_mainnet: 20.0,
            gas_too_high_usd_other: 5.0,
        }
    }
}

/// Gas payment resolution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// Coalescing window for gasless re-checks in milliseconds.
    pub gasless_debounce_ms: u64,

    /// Coalescing window for gas-account re-checks in milliseconds.
    pub gas_account_debounce_ms: u64,

    /// Promotions whose color fields are dropped before display.
    pub colorless_promotion_ids: Vec<String>,

    /// Chains where the gas account never pays.
    pub gas_account_excluded_chains: Vec<u64>,

    /// Switch to the gas account once when gasless is advertised but unusable.
    pub auto_switch_to_gas_account: bool,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            gasless_debounce_ms: 300,
            gas_account_debounce_ms: 200,
            colorless_promotion_ids: vec!["0ca5aaa5f0c9217e6f45fe1d109c24fb".to_string()],
            gas_account_excluded_chains: Vec::new(),
            auto_switch_to_gas_account: true,
        }
    }
}

/// Security verdict configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Rule ids whose DANGER result blocks even when a SAFE result exists.
    pub true_danger_rule_ids: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            true_danger_rule_ids: ["1016", "1019", "1020", "1021"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Approval task configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// A failed simulation blocks confirmation.
    pub block_on_simulation_failure: bool,

    /// Largest batch a single task accepts.
    pub max_batch_size: usize,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            block_on_simulation_failure: true,
            max_batch_size: 16,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Chain registry entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Chain ID (e.g., 1 for Ethereum mainnet, 31337 for local Anvil).
    pub chain_id: u64,

    /// Backend identifier (e.g., "eth").
    pub server_id: String,

    /// Enum-style name (e.g., "ETH").
    pub name: String,

    pub native_token_symbol: String,

    /// Chain accepts EIP-1559 fee fields.
    pub eip1559: bool,

    /// Chain charges an L1 data fee.
    pub l1_fee_estimation: bool,

    pub is_testnet: bool,

    /// User replaced the default RPC.
    pub custom_rpc: bool,

    /// JSON-RPC endpoint URL.
    pub rpc_url: Option<String>,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            server_id: "eth".to_string(),
            name: "ETH".to_string(),
            native_token_symbol: "ETH".to_string(),
            eip1559: true,
            l1_fee_estimation: false,
            is_testnet: false,
            custom_rpc: false,
            rpc_url: None,
            failover_urls: Vec::new(),
            rpc_timeout_secs: 10,
        }
    }
}

/// Safe transaction service endpoint for one chain.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SafeServiceEndpoint {
    pub chain_id: u64,
    pub url: String,
}

/// Safe transaction service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SafeConfig {
    pub services: Vec<SafeServiceEndpoint>,

    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl SafeConfig {
    pub fn service_url(&self, chain_id: u64) -> Option<&str> {
        self.services
            .iter()
            .find(|s| s.chain_id == chain_id)
            .map(|s| s.url.as_str())
    }
}

impl Default for SafeConfig {
    fn default() -> Self {
        Self {
            services: vec![
                SafeServiceEndpoint {
                    chain_id: 1,
                    url: "https://safe-transaction-mainnet.safe.global/api".to_string(),
                },
                SafeServiceEndpoint {
                    chain_id: 11_155_111,
                    url: "https://safe-transaction-sepolia.safe.global/api".to_string(),
                },
            ],
            request_timeout_secs: 10,
        }
    }
}

/// Pending transaction store configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PendingConfig {
    /// JSON file the store is loaded from and saved to.
    pub persistence_path: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
