//! Transaction intake.
//!
//! # Data Flow
//! ```text
//! RawTransaction[] (dApp JSON, loosely typed)
//!     → normalizer.rs (hex.rs for quantities, addresses, data)
//!     → TransactionDraft[] with batch flags
//! ```

pub mod hex;
pub mod normalizer;
pub mod types;

pub use normalizer::{normalize_batch, normalize_transaction};
pub use types::{
    AuthorizationList, NormalizeError, NormalizeResult, RawTransaction, RequestHints, TransactionDraft, TxFlags,
};
