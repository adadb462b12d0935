//! Data-source seam between the registry and the Electrum client.

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::Network;

use ember_client::ElectrumClient;
use ember_protocol::address_to_scripthash;
use ember_types::{Balance, BitcoinAddress, FeeSnapshot, HistoryEntry, MempoolEntry};

use crate::MonitorError;

/// Everything the registry needs from the chain, keyed by scripthash.
///
/// Implemented for the live client below; tests substitute mocks. Error
/// messages must pass through unaltered; classification depends on the
/// server's exact wording.
#[async_trait]
pub trait ChainSource: Send + Sync {
    fn scripthash(&self, address: &BitcoinAddress) -> Result<String, MonitorError>;

    async fn balance(&self, scripthash: &str) -> Result<Balance, MonitorError>;

    async fn history(&self, scripthash: &str) -> Result<Vec<HistoryEntry>, MonitorError>;

    async fn mempool(&self, scripthash: &str) -> Result<Vec<MempoolEntry>, MonitorError>;

    async fn fee_snapshot(&self, mempool: &[MempoolEntry]) -> Result<FeeSnapshot, MonitorError>;

    async fn subscribe(&self, scripthash: &str) -> Result<(), MonitorError>;

    async fn unsubscribe(&self, scripthash: &str) -> Result<(), MonitorError>;
}

/// Live implementation over the shared Electrum connection.
pub struct ElectrumChainSource {
    client: Arc<ElectrumClient>,
    network: Network,
}

impl ElectrumChainSource {
    pub fn new(client: Arc<ElectrumClient>, network: Network) -> Self {
        Self { client, network }
    }
}

fn source_err(e: impl std::fmt::Display) -> MonitorError {
    MonitorError::Source(e.to_string())
}

#[async_trait]
impl ChainSource for ElectrumChainSource {
    fn scripthash(&self, address: &BitcoinAddress) -> Result<String, MonitorError> {
        address_to_scripthash(address, self.network)
            .map_err(|e| MonitorError::InvalidAddress(e.to_string()))
    }

    async fn balance(&self, scripthash: &str) -> Result<Balance, MonitorError> {
        self.client.get_balance(scripthash).await.map_err(source_err)
    }

    async fn history(&self, scripthash: &str) -> Result<Vec<HistoryEntry>, MonitorError> {
        self.client.get_history(scripthash).await.map_err(source_err)
    }

    async fn mempool(&self, scripthash: &str) -> Result<Vec<MempoolEntry>, MonitorError> {
        self.client.get_mempool(scripthash).await.map_err(source_err)
    }

    async fn fee_snapshot(&self, mempool: &[MempoolEntry]) -> Result<FeeSnapshot, MonitorError> {
        self.client
            .transaction_estimate(mempool)
            .await
            .map_err(source_err)
    }

    async fn subscribe(&self, scripthash: &str) -> Result<(), MonitorError> {
        self.client
            .subscribe_scripthash(scripthash)
            .await
            .map(|_| ())
            .map_err(source_err)
    }

    async fn unsubscribe(&self, scripthash: &str) -> Result<(), MonitorError> {
        self.client
            .unsubscribe_scripthash(scripthash)
            .await
            .map_err(source_err)
    }
}
