//! Transaction approval and gas-settlement engine.
//!
//! Takes a raw transaction batch requested by a dApp, simulates and prices it,
//! resolves how gas is paid, aggregates risk verdicts and drives the batch
//! through confirm, sign and submit (or Safe co-owner collection).

pub mod account;
pub mod approval;
pub mod chain;
pub mod config;
pub mod gas;
pub mod multisig;
pub mod observability;
pub mod payment;
pub mod pending;
pub mod resilience;
pub mod security;
pub mod services;
pub mod signer;
pub mod transaction;

pub use approval::{ApprovalTask, TaskStatus};
pub use config::schema::EngineConfig;
pub use services::Collaborators;
