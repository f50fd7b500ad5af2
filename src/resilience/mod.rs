//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Backend read during prefetch:
//!     → retries.rs (retry transient failures with backoff)
//!     → backoff.rs (exponential delay + jitter)
//!
//! Eligibility re-check after a gas edit:
//!     → debounce.rs (cancel-and-replace window, newest edit wins)
//! ```
//!
//! # Design Decisions
//! - Timeouts live in the clients; this layer only decides when to try again
//! - Signing and broadcast are never retried automatically

pub mod backoff;
pub mod debounce;
pub mod retries;

pub use debounce::Debouncer;
pub use retries::retry_with_backoff;
