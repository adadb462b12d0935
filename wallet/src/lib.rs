//! Fee bumping for unconfirmed transactions.
//!
//! Wallet internals (key handling, transaction construction, signing) are
//! opaque capabilities behind [`WalletOps`]; this crate owns the
//! eligibility rules and the linear build → broadcast state machine.

mod capabilities;
mod engine;
mod error;

pub use capabilities::{BuiltTransaction, WalletOps, FINAL_SEQUENCE};
pub use engine::{
    BumpCandidate, BumpKind, BumpStage, FeeBumpEngine, CANCEL_MEMO_PREFIX, CPFP_MEMO,
    FEE_RATE_SAFETY_MARGIN, POST_BROADCAST_REFRESH_DELAY,
};
pub use error::BumpError;
