//! Per-address balance, history, and fee-estimate state.

use serde::{Deserialize, Serialize};

use crate::Txid;

/// Confirmed/unconfirmed balance in satoshis.
///
/// `unconfirmed` is signed: outgoing mempool transactions show up as a
/// negative delta on Electrum servers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: u64,
    pub unconfirmed: i64,
}

/// One confirmed history entry as reported by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub tx_hash: Txid,
    /// Block height; 0 for mempool, -1 for unconfirmed-parent entries.
    pub height: i64,
}

/// One mempool entry for an address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolEntry {
    pub tx_hash: Txid,
    /// Always 0 for mempool entries.
    pub height: i64,
    /// Fee in satoshis.
    pub fee: u64,
}

/// Network-wide fee-rate buckets in sat/vbyte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTiers {
    pub fast: u64,
    pub medium: u64,
    pub slow: u64,
}

/// Confirmation estimate for a pending transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSnapshot {
    /// Human-readable ETA bucket: "10m", "3h", "1d+", or empty when unknown.
    pub eta: String,
    pub sat_per_vbyte: Option<u64>,
}

/// How a state update reached the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSource {
    /// Server-side push notification.
    Subscription,
    /// Manual or fallback poll.
    Polling,
}

/// Snapshot of everything the core tracks for one address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressState {
    pub balance: Balance,
    pub history: Vec<HistoryEntry>,
    pub mempool: Vec<MempoolEntry>,
    pub fee_snapshot: FeeSnapshot,
}

impl AddressState {
    /// True when the address has pending (mempool) activity.
    pub fn has_unconfirmed(&self) -> bool {
        self.balance.unconfirmed != 0 || !self.mempool.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(byte: char) -> Txid {
        Txid::new(byte.to_string().repeat(64)).unwrap()
    }

    #[test]
    fn default_state_has_no_unconfirmed() {
        assert!(!AddressState::default().has_unconfirmed());
    }

    #[test]
    fn negative_unconfirmed_counts_as_pending() {
        let state = AddressState {
            balance: Balance {
                confirmed: 100_000,
                unconfirmed: -40_000,
            },
            ..Default::default()
        };
        assert!(state.has_unconfirmed());
    }

    #[test]
    fn mempool_entry_counts_as_pending() {
        let state = AddressState {
            mempool: vec![MempoolEntry {
                tx_hash: txid('a'),
                height: 0,
                fee: 1_500,
            }],
            ..Default::default()
        };
        assert!(state.has_unconfirmed());
    }
}
