//! Broadcast coordination — readiness gating for transaction submission.
//!
//! Broadcasting never retries on its own; retry is a user action at the
//! call site. What this layer does guarantee is that a submission only
//! happens over a live connection: ping first, reconnect against the
//! configured candidates if the ping fails, give up after a bounded
//! number of sweeps.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ember_types::{ServerCandidate, Txid};

use crate::{ClientError, ElectrumClient};

/// Readiness seam so the fee-bump engine can be tested without sockets.
#[async_trait]
pub trait ConnectionReady: Send + Sync {
    /// Block until the shared connection is usable, or report failure.
    async fn wait_until_ready(&self) -> bool;
}

/// Maximum reconnect sweeps before a broadcast attempt is abandoned.
const MAX_RECONNECT_SWEEPS: u32 = 5;

/// Pause between reconnect sweeps.
const RECONNECT_SPACING: Duration = Duration::from_millis(500);

pub struct BroadcastCoordinator {
    client: Arc<ElectrumClient>,
    candidates: Vec<ServerCandidate>,
}

impl BroadcastCoordinator {
    pub fn new(client: Arc<ElectrumClient>, candidates: Vec<ServerCandidate>) -> Self {
        Self { client, candidates }
    }

    /// Submit raw transaction hex over the shared connection.
    ///
    /// Waits for readiness first; does not retry a failed submission.
    pub async fn broadcast_hex(&self, hex: &str) -> Result<Txid, ClientError> {
        if !self.wait_until_ready().await {
            return Err(ClientError::NotConnected);
        }
        self.client.transaction_broadcast(hex).await
    }
}

#[async_trait]
impl ConnectionReady for BroadcastCoordinator {
    async fn wait_until_ready(&self) -> bool {
        if self.client.server_ping().await.is_ok() {
            return true;
        }

        for sweep in 1..=MAX_RECONNECT_SWEEPS {
            tracing::debug!(sweep, "connection not ready, reconnecting");
            if self.client.connect(&self.candidates).await {
                return true;
            }
            tokio::time::sleep(RECONNECT_SPACING).await;
        }

        tracing::warn!("gave up waiting for a usable connection");
        false
    }
}
