//! Fundamental types shared across the Ember wallet network core.

mod address;
mod server;
mod state;

pub use address::{AddressError, BitcoinAddress, Txid};
pub use server::{hardcoded_servers, ServerCandidate, Transport};
pub use state::{
    AddressState, Balance, FeeSnapshot, FeeTiers, HistoryEntry, MempoolEntry, UpdateSource,
};
