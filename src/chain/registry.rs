//! Chain metadata lookup.
//!
//! The engine never hardcodes chain tables; every lookup goes through a
//! [`ChainRegistry`]. [`StaticChainRegistry`] is the config-backed default.

use std::collections::{HashMap, HashSet};

use crate::chain::types::{ChainConfig, ChainError, ChainId, ChainInfo, ChainResult};

/// Resolves chain metadata by numeric id, server id or enum name.
pub trait ChainRegistry: Send + Sync {
    fn by_id(&self, id: ChainId) -> Option<ChainInfo>;

    fn by_server_id(&self, server_id: &str) -> Option<ChainInfo>;

    fn by_name(&self, name: &str) -> Option<ChainInfo>;

    /// The user replaced the default RPC for this chain.
    fn has_custom_rpc(&self, id: ChainId) -> bool;

    fn require(&self, id: ChainId) -> ChainResult<ChainInfo> {
        self.by_id(id)
            .ok_or_else(|| ChainError::UnknownChain(id.to_string()))
    }
}

/// Registry built once from the `[[chains]]` config entries.
#[derive(Debug, Clone, Default)]
pub struct StaticChainRegistry {
    chains: HashMap<ChainId, ChainInfo>,
    custom_rpc: HashSet<ChainId>,
}

impl StaticChainRegistry {
    pub fn from_config(chains: &[ChainConfig]) -> Self {
        let mut registry = Self::default();
        for chain in chains {
            let info = ChainInfo::from(chain);
            if chain.custom_rpc {
                registry.custom_rpc.insert(info.id);
            }
            registry.chains.insert(info.id, info);
        }
        tracing::debug!(chains = registry.chains.len(), "Chain registry loaded");
        registry
    }

    pub fn insert(&mut self, info: ChainInfo) {
        self.chains.insert(info.id, info);
    }

    pub fn set_custom_rpc(&mut self, id: ChainId, enabled: bool) {
        if enabled {
            self.custom_rpc.insert(id);
        } else {
            self.custom_rpc.remove(&id);
        }
    }
}

impl ChainRegistry for StaticChainRegistry {
    fn by_id(&self, id: ChainId) -> Option<ChainInfo> {
        self.chains.get(&id).cloned()
    }

    fn by_server_id(&self, server_id: &str) -> Option<ChainInfo> {
        self.chains
            .values()
            .find(|c| c.server_id.eq_ignore_ascii_case(server_id))
            .cloned()
    }

    fn by_name(&self, name: &str) -> Option<ChainInfo> {
        self.chains
            .values()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn has_custom_rpc(&self, id: ChainId) -> bool {
        self.custom_rpc.contains(&id)
    }
}
