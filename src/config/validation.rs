//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ratios, gas floors, debounce windows)
//! - Check referential integrity (unique chain ids, parseable URLs)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EngineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::EngineConfig;

/// Longest coalescing window accepted for eligibility re-checks.
const MAX_DEBOUNCE_MS: u64 = 5_000;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let gas = &config.gas;
    if !(gas.default_gas_limit_ratio >= 1.0) {
        errors.push(ValidationError::new("gas.default_gas_limit_ratio", "must be >= 1"));
    }
    if gas.min_gas_limit == 0 {
        errors.push(ValidationError::new("gas.min_gas_limit", "must be > 0"));
    }
    if gas.fallback_gas_limit < gas.min_gas_limit {
        errors.push(ValidationError::new(
            "gas.fallback_gas_limit",
            "must be >= gas.min_gas_limit",
        ));
    }
    if !(gas.retry_fee_bump > 1.0) {
        errors.push(ValidationError::new("gas.retry_fee_bump", "must be > 1"));
    }
    for (i, r) in gas.chain_ratios.iter().enumerate() {
        if !(r.ratio > 0.0) {
            errors.push(ValidationError::new(
                format!("gas.chain_ratios[{}].ratio", i),
                "must be > 0",
            ));
        }
    }
    if gas.gas_too_high_guard && (gas.gas_too_high_usd_mainnet <= 0.0 || gas.gas_too_high_usd_other <= 0.0) {
        errors.push(ValidationError::new(
            "gas.gas_too_high_usd_*",
            "thresholds must be > 0 when the guard is enabled",
        ));
    }

    for (field, value) in [
        ("payment.gasless_debounce_ms", config.payment.gasless_debounce_ms),
        ("payment.gas_account_debounce_ms", config.payment.gas_account_debounce_ms),
    ] {
        if value > MAX_DEBOUNCE_MS {
            errors.push(ValidationError::new(
                field,
                format!("must be <= {} ms", MAX_DEBOUNCE_MS),
            ));
        }
    }

    if config.approval.max_batch_size == 0 {
        errors.push(ValidationError::new("approval.max_batch_size", "must be > 0"));
    }

    if config.resilience.max_attempts == 0 {
        errors.push(ValidationError::new("resilience.max_attempts", "must be >= 1"));
    }
    if config.resilience.base_delay_ms > config.resilience.max_delay_ms {
        errors.push(ValidationError::new(
            "resilience.base_delay_ms",
            "must be <= resilience.max_delay_ms",
        ));
    }

    let mut seen = HashSet::new();
    for (i, chain) in config.chains.iter().enumerate() {
        if chain.chain_id == 0 {
            errors.push(ValidationError::new(format!("chains[{}].chain_id", i), "must be > 0"));
        }
        if !seen.insert(chain.chain_id) {
            errors.push(ValidationError::new(
                format!("chains[{}].chain_id", i),
                format!("duplicate chain id {}", chain.chain_id),
            ));
        }
        if chain.server_id.is_empty() {
            errors.push(ValidationError::new(format!("chains[{}].server_id", i), "must not be empty"));
        }
        let urls = chain.rpc_url.iter().chain(chain.failover_urls.iter());
        for url in urls {
            if url.parse::<url::Url>().is_err() {
                errors.push(ValidationError::new(
                    format!("chains[{}].rpc_url", i),
                    format!("invalid URL '{}'", url),
                ));
            }
        }
    }

    for (i, service) in config.safe.services.iter().enumerate() {
        if service.url.parse::<url::Url>().is_err() {
            errors.push(ValidationError::new(
                format!("safe.services[{}].url", i),
                format!("invalid URL '{}'", service.url),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
