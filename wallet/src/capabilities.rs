//! Consumed wallet capabilities.
//!
//! The engine never touches keys or scripts; everything it needs from the
//! wallet is expressed here and treated as opaque. Only one wallet type
//! (the HD witness wallet) implements the bump-construction methods; all
//! others answer `supports_fee_bump() == false` and the engine resolves
//! to the non-bumpable outcome without further calls.

use async_trait::async_trait;

use ember_types::Txid;

use crate::BumpError;

/// The protocol's "final" input sequence. A transaction whose inputs all
/// carry this value opted out of replacement.
pub const FINAL_SEQUENCE: u32 = 0xFFFF_FFFF;

/// A signed transaction produced by a bump-construction capability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuiltTransaction {
    pub hex: String,
    pub txid: Txid,
}

#[async_trait]
pub trait WalletOps: Send + Sync {
    /// Whether this wallet type supports fee bumping at all.
    fn supports_fee_bump(&self) -> bool;

    /// Confirmation count as the network sees it.
    async fn confirmations(&self, txid: &Txid) -> Result<u32, BumpError>;

    /// The transaction pays to this wallet (CPFP precondition).
    async fn is_to_us(&self, txid: &Txid) -> Result<bool, BumpError>;

    /// The transaction was sent by this wallet (RBF precondition).
    async fn is_ours(&self, txid: &Txid) -> Result<bool, BumpError>;

    /// Highest input sequence number used by the transaction.
    async fn max_sequence(&self, txid: &Txid) -> Result<u32, BumpError>;

    /// The wallet can construct a fee-bump replacement (all inputs known).
    async fn can_bump(&self, txid: &Txid) -> Result<bool, BumpError>;

    /// The wallet can redirect the funds back to itself (has an output it
    /// does not already own to reclaim).
    async fn can_cancel(&self, txid: &Txid) -> Result<bool, BumpError>;

    /// The transaction's current fee rate in sat/vB.
    async fn implied_fee_rate(&self, txid: &Txid) -> Result<u64, BumpError>;

    async fn create_cpfp_bump(
        &self,
        txid: &Txid,
        sat_per_vbyte: u64,
    ) -> Result<BuiltTransaction, BumpError>;

    async fn create_rbf_bump(
        &self,
        txid: &Txid,
        sat_per_vbyte: u64,
    ) -> Result<BuiltTransaction, BumpError>;

    async fn create_rbf_cancel(
        &self,
        txid: &Txid,
        sat_per_vbyte: u64,
    ) -> Result<BuiltTransaction, BumpError>;

    /// Submit signed hex to the network. `false` means the submission was
    /// rejected without a transport failure.
    async fn broadcast_tx(&self, hex: &str) -> Result<bool, BumpError>;

    fn tx_memo(&self, txid: &Txid) -> Option<String>;

    fn set_tx_memo(&self, txid: &Txid, memo: &str);

    /// Tell the network-state watcher to track a new transaction id.
    fn register_watch(&self, txid: &Txid);

    /// Re-fetch the wallet's transaction list.
    async fn refresh_transactions(&self);
}
