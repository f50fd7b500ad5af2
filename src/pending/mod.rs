//! Locally tracked in-flight transactions.
//!
//! Read by nonce recommendation and by simulation (as the pending list),
//! written by the submission path after a successful broadcast.

pub mod store;

pub use store::{PendingTx, PendingTxStore};
