//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EngineConfig (validated, immutable)
//!     → SharedConfig (arc-swap) read by new approval tasks
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap inside SharedConfig
//!     → tasks created afterwards observe the new config
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - A running task keeps the snapshot it started with
//! - All fields have defaults to allow minimal configs

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

use arc_swap::ArcSwap;
use std::sync::Arc;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::EngineConfig;

/// Process-wide configuration handle with lock-free reads.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<ArcSwap<EngineConfig>>,
}

impl SharedConfig {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<EngineConfig> {
        self.inner.load_full()
    }

    pub fn store(&self, config: EngineConfig) {
        self.inner.store(Arc::new(config));
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_survives_swap() {
        let shared = SharedConfig::default();
        let before = shared.load();

        let mut next = EngineConfig::default();
        next.gas.min_gas_limit = 30_000;
        shared.store(next);

        assert_eq!(before.gas.min_gas_limit, 21_000);
        assert_eq!(shared.load().gas.min_gas_limit, 30_000);
    }
}
