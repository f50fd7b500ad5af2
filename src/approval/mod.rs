//! Approval task state machine.
//!
//! # Data Flow
//! ```text
//! ApprovalRequest
//!     → normalize batch, resolve chain, pick initial gas level
//!     → prefetch: nonce ∥ balance ∥ quote ∥ median
//!               → simulation → gas limits → costs → gas/nonce checks
//!               → security ∥ gasless ∥ gas account   (only once ready)
//!     → confirm: blockers empty → sign each item in order
//!                            or open a Safe proposal and collect owners
//! ```
//!
//! # Design Decisions
//! - Every edit produces new drafts; nothing mutates a draft in place
//! - Prefetch steps are memoized so a retried prefetch resumes where it failed
//! - Snapshots go out over a `watch` channel; callers never touch task state

pub mod prefetch;
pub mod task;
pub mod types;

pub use prefetch::PrefetchData;
pub use task::ApprovalTask;
pub use types::{
    ApprovalError, ApprovalRequest, ApprovalResult, CantProcessReason, ConfirmBlocker, ConfirmProgress,
    ItemProgress, PrefetchNotice, PrefetchStep, RetryHint, TaskSnapshot, TaskStatus, TxItem,
};
