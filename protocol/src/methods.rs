//! Electrum protocol method names consumed by the client.

pub const SERVER_VERSION: &str = "server.version";
pub const SERVER_PING: &str = "server.ping";

pub const SCRIPTHASH_GET_BALANCE: &str = "blockchain.scripthash.get_balance";
pub const SCRIPTHASH_GET_HISTORY: &str = "blockchain.scripthash.get_history";
pub const SCRIPTHASH_GET_MEMPOOL: &str = "blockchain.scripthash.get_mempool";
pub const SCRIPTHASH_SUBSCRIBE: &str = "blockchain.scripthash.subscribe";
pub const SCRIPTHASH_UNSUBSCRIBE: &str = "blockchain.scripthash.unsubscribe";

pub const TRANSACTION_GET: &str = "blockchain.transaction.get";
pub const TRANSACTION_BROADCAST: &str = "blockchain.transaction.broadcast";

pub const ESTIMATE_FEE: &str = "blockchain.estimatefee";
pub const FEE_HISTOGRAM: &str = "mempool.get_fee_histogram";
