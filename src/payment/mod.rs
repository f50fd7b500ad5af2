//! Gas payment resolver.
//!
//! # Data Flow
//! ```text
//! account keyring + chain flags → prechecks (no I/O)
//! simulated batch → EligibilityChecker (gasless sponsor, gas account ledger)
//!     → GasPaymentResolver::apply_* → active GasPaymentMethod
//!     → one-shot auto switch native → gasAccount after first load
//! ```
//!
//! # Design Decisions
//! - Methods are a closed enum; every branch is matched exhaustively
//! - Switching is refused while the task is signing

pub mod resolver;
pub mod types;

pub use resolver::{EligibilityChecker, GasPaymentResolver};
pub use types::{
    GasAccountStatus, GasAccountUnavailable, GasPaymentMethod, GaslessStatus, GaslessUnavailable, PaymentError,
    PaymentResult,
};
