//! Multisig (Safe) confirmation tracker.
//!
//! # Data Flow
//! ```text
//! confirmed draft from a Safe account
//!     → types.rs   (SafeTx EIP-712 hash for the payload)
//!     → tracker.rs (owners ∩ local accounts, existing confirmations, threshold)
//!     → owner signs the hash → tracker posts a proposal or adds a confirmation
//!     → service.rs (Safe transaction service over HTTP)
//! ```
//!
//! # Design Decisions
//! - A finished proposal for the same hash is reused instead of re-signed
//! - Message payloads are looked up only; proposals are transactions

pub mod service;
pub mod tracker;
pub mod types;

pub use service::SafeServiceClient;
pub use tracker::{build_candidates, MultisigTracker};
pub use types::{
    recommend_safe_nonce, MultisigError, MultisigResult, OwnerCandidate, SafeConfirmation, SafeInfo,
    SafeMultisigState, SafePayload, SafeProposal, SafeTransactionData,
};
