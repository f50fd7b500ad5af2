//! Gas recommendation engine.
//!
//! # Data Flow
//! ```text
//! simulation result + draft
//!     → recommend.rs (gas recommendation, gas limit, fees, initial level)
//!     → nonce.rs     (on-chain vs local pending nonce, batch assignment)
//!     → explain.rs   (wei / native / USD cost, shared L1 fee)
//!     → check.rs     (3001 / 3003 / 3004 / 3005 / 3006 over the batch)
//! engine.rs wires the async sources (RPC, history, L1 fee) into the above.
//! ```
//!
//! # Design Decisions
//! - All wei maths in U256; floats only for display amounts and USD
//! - Pure functions separate from I/O so checks are testable without mocks

pub mod check;
pub mod engine;
pub mod explain;
pub mod nonce;
pub mod recommend;
pub mod types;

pub use check::{check_gas_and_nonce, GasCheckItem, GasCheckParams};
pub use engine::{ExplainGas, GasEngine};
pub use explain::PreparedL1Fee;
pub use recommend::LastGasSelection;
pub use types::{
    CheckLevel, GasCheckCode, GasCheckError, GasCost, GasError, GasLevel, GasLevelKind, GasLimitPlan, GasQuote,
    GasRecommendation, GasResult,
};
