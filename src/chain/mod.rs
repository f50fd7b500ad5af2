//! Chain metadata and RPC access.
//!
//! # Data Flow
//! ```text
//! [[chains]] config entries
//!     → registry.rs (ChainInfo by id / server id / name, custom RPC flags)
//!     → client.rs   (failover RPC per chain, nonce/balance reads, broadcast)
//! ```
//!
//! # Design Decisions
//! - Metadata lookups are synchronous; only RPC calls suspend
//! - Every RPC call carries its own timeout and walks the failover list

pub mod client;
pub mod registry;
pub mod types;

pub use client::{RpcClient, RpcRouter};
pub use registry::{ChainRegistry, StaticChainRegistry};
pub use types::{ChainError, ChainId, ChainInfo, ChainResult, ETHEREUM_MAINNET};
