//! Security verdict aggregator.
//!
//! # Data Flow
//! ```text
//! rule engine results ─┐
//!                      ├→ aggregator.rs (pure) → SecurityVerdict
//! processed rule ids ──┘
//! session.rs owns both inputs per approval and recomputes on change only.
//! ```
//!
//! # Design Decisions
//! - Verdict is a pure function of (results, processed set, exception list)
//! - Sessions are reset explicitly; nothing is shared between approvals

pub mod aggregator;
pub mod session;
pub mod types;

pub use aggregator::{aggregate_level, has_unprocessed};
pub use session::SecuritySession;
pub use types::{Level, RuleResult, SecurityVerdict};
