//! Electrum client for the Ember wallet core.
//!
//! One process owns exactly one live server connection. All request/response
//! traffic is sequenced through [`ElectrumClient`], which wraps the
//! [`ConnectionManager`] in a mutex so frames from different callers never
//! interleave on the wire. Server-push subscription events are routed to a
//! channel the monitor layer drains.

mod broadcast;
mod client;
mod connection;
mod error;
mod fee_estimator;

pub use broadcast::{BroadcastCoordinator, ConnectionReady};
pub use client::{ElectrumClient, MAX_HISTORY_TRANSACTIONS};
pub use connection::{ConnectionManager, ConnectionState, CONNECT_TIMEOUT, READ_TIMEOUT};
pub use error::ClientError;
pub use fee_estimator::{btc_per_kb_to_sat_per_vb, estimate_from_histogram, eta_label};
