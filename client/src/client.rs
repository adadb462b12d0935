//! Typed Electrum queries over the shared connection.
//!
//! All traffic goes through [`ElectrumClient::call`], which holds the
//! connection mutex for the whole request/reply exchange so two callers
//! can never interleave frames. Notification frames that arrive while a
//! reply is pending are routed to the subscription channel instead of
//! being dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use ember_protocol::methods;
use ember_protocol::{parse_frame, Frame, Notification, RpcRequest};
use ember_types::{Balance, FeeSnapshot, FeeTiers, HistoryEntry, MempoolEntry, ServerCandidate, Txid};

use crate::connection::{ConnectionManager, CONNECT_TIMEOUT};
use crate::fee_estimator::{btc_per_kb_to_sat_per_vb, estimate_from_histogram, eta_label};
use crate::ClientError;

/// Histories above this size are rejected rather than enumerated.
pub const MAX_HISTORY_TRANSACTIONS: usize = 1000;

/// Buffered subscription events before backpressure drops them.
const NOTIFICATION_BUFFER: usize = 64;

pub struct ElectrumClient {
    manager: Mutex<ConnectionManager>,
    next_id: AtomicU64,
    notify_tx: mpsc::Sender<Notification>,
    notify_rx: std::sync::Mutex<Option<mpsc::Receiver<Notification>>>,
}

impl ElectrumClient {
    pub fn new(allow_invalid_certs: bool) -> Arc<Self> {
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFICATION_BUFFER);
        Arc::new(Self {
            manager: Mutex::new(ConnectionManager::new(allow_invalid_certs)),
            next_id: AtomicU64::new(1),
            notify_tx,
            notify_rx: std::sync::Mutex::new(Some(notify_rx)),
        })
    }

    /// Take the subscription-event receiver. Yields `Some` exactly once;
    /// there is a single consumer (the monitor's notification pump).
    pub fn take_notifications(&self) -> Option<mpsc::Receiver<Notification>> {
        self.notify_rx.lock().expect("notification receiver lock").take()
    }

    /// Connect (or reconnect) against a candidate list.
    pub async fn connect(&self, candidates: &[ServerCandidate]) -> bool {
        self.manager.lock().await.connect(candidates, CONNECT_TIMEOUT).await
    }

    /// Connect with an explicit per-candidate timeout.
    pub async fn connect_with_timeout(
        &self,
        candidates: &[ServerCandidate],
        timeout: Duration,
    ) -> bool {
        self.manager.lock().await.connect(candidates, timeout).await
    }

    pub async fn is_connected(&self) -> bool {
        self.manager.lock().await.is_connected()
    }

    pub async fn active_server(&self) -> Option<ServerCandidate> {
        self.manager.lock().await.active_server().cloned()
    }

    pub async fn close(&self) {
        self.manager.lock().await.close();
    }

    /// Issue one request and wait for its reply.
    ///
    /// Replies to superseded request ids are discarded; notification
    /// frames are forwarded to the subscription channel.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        let mut manager = self.manager.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = RpcRequest::new(id, method, params).to_frame()?;
        manager.send(frame.as_bytes()).await?;

        loop {
            let raw = manager.receive().await?;
            match parse_frame(&raw) {
                Ok(Frame::Response(resp)) if resp.id == id => return Ok(resp.result),
                Ok(Frame::Response(resp)) => {
                    tracing::debug!(got = resp.id, want = id, "discarding stale reply");
                }
                Ok(Frame::Notification(event)) => {
                    if self.notify_tx.try_send(event).is_err() {
                        tracing::warn!("subscription event buffer full, dropping notification");
                    }
                }
                Err(ember_protocol::ProtocolError::Server(message)) => {
                    return Err(ClientError::Rpc(message));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn server_ping(&self) -> Result<(), ClientError> {
        self.call(methods::SERVER_PING, vec![]).await.map(|_| ())
    }

    pub async fn get_balance(&self, scripthash: &str) -> Result<Balance, ClientError> {
        let result = self
            .call(methods::SCRIPTHASH_GET_BALANCE, vec![json!(scripthash)])
            .await?;
        serde_json::from_value(result)
            .map_err(|e| ClientError::Rpc(format!("invalid balance reply: {e}")))
    }

    /// Fetch confirmed history, refusing addresses whose history exceeds
    /// [`MAX_HISTORY_TRANSACTIONS`]. The wording of the rejection matters:
    /// the monitor classifies it as a permanent limitation by substring.
    pub async fn get_history(&self, scripthash: &str) -> Result<Vec<HistoryEntry>, ClientError> {
        let result = self
            .call(methods::SCRIPTHASH_GET_HISTORY, vec![json!(scripthash)])
            .await?;
        let history: Vec<HistoryEntry> = serde_json::from_value(result)
            .map_err(|e| ClientError::Rpc(format!("invalid history reply: {e}")))?;

        if history.len() > MAX_HISTORY_TRANSACTIONS {
            return Err(ClientError::Rpc(format!(
                "Addresses with history of > {MAX_HISTORY_TRANSACTIONS} transactions are not supported"
            )));
        }
        Ok(history)
    }

    pub async fn get_mempool(&self, scripthash: &str) -> Result<Vec<MempoolEntry>, ClientError> {
        let result = self
            .call(methods::SCRIPTHASH_GET_MEMPOOL, vec![json!(scripthash)])
            .await?;
        serde_json::from_value(result)
            .map_err(|e| ClientError::Rpc(format!("invalid mempool reply: {e}")))
    }

    /// Subscribe to server pushes for a scripthash. Returns the current
    /// status token (None for never-used addresses).
    pub async fn subscribe_scripthash(&self, scripthash: &str) -> Result<Option<String>, ClientError> {
        let result = self
            .call(methods::SCRIPTHASH_SUBSCRIBE, vec![json!(scripthash)])
            .await?;
        Ok(result.as_str().map(str::to_string))
    }

    /// Best-effort server-side unsubscribe. Not every server implements
    /// the method; failures are reported but callers treat them as advisory.
    pub async fn unsubscribe_scripthash(&self, scripthash: &str) -> Result<(), ClientError> {
        self.call(methods::SCRIPTHASH_UNSUBSCRIBE, vec![json!(scripthash)])
            .await
            .map(|_| ())
    }

    /// Verbose transaction lookup (vsize, confirmations, ...).
    pub async fn get_transaction_verbose(&self, txid: &Txid) -> Result<Value, ClientError> {
        self.call(
            methods::TRANSACTION_GET,
            vec![json!(txid.as_str()), json!(true)],
        )
        .await
    }

    /// Submit raw transaction hex; returns the new txid.
    pub async fn transaction_broadcast(&self, hex: &str) -> Result<Txid, ClientError> {
        let result = self
            .call(methods::TRANSACTION_BROADCAST, vec![json!(hex)])
            .await?;
        let id = result
            .as_str()
            .ok_or_else(|| ClientError::Rpc("broadcast reply is not a txid".into()))?;
        Txid::new(id).map_err(|e| ClientError::Rpc(e.to_string()))
    }

    /// Fee rate (sat/vB) for confirmation within `blocks` blocks.
    pub async fn estimate_fee(&self, blocks: u64) -> Result<u64, ClientError> {
        let result = self
            .call(methods::ESTIMATE_FEE, vec![json!(blocks.max(1))])
            .await?;
        let btc_per_kb = result
            .as_f64()
            .ok_or_else(|| ClientError::Rpc("estimatefee reply is not a number".into()))?;
        Ok(btc_per_kb_to_sat_per_vb(btc_per_kb))
    }

    /// Fast/medium/slow fee buckets.
    ///
    /// The fast bucket prefers the mempool fee histogram (median rate of
    /// the next block's worth of transactions); the node's own estimates
    /// are then used as relative weights for medium and slow. When the
    /// histogram is missing or degenerate, the node estimates are used
    /// directly.
    pub async fn fee_tiers(&self) -> Result<FeeTiers, ClientError> {
        let histogram = self.fee_histogram().await;

        let fast_core = self.estimate_fee(1).await?.max(1);
        let medium_core = self.estimate_fee(18).await?;
        let slow_core = self.estimate_fee(144).await?;

        let usable = histogram
            .as_ref()
            .is_some_and(|h| !h.is_empty() && h[0].0 <= 1000.0);
        if !usable {
            return Ok(FeeTiers {
                fast: fast_core,
                medium: medium_core,
                slow: slow_core,
            });
        }

        let histogram = histogram.expect("checked above");
        let fast = estimate_from_histogram(1, &histogram).max(2);
        let medium = (((fast as f64) * (medium_core as f64) / (fast_core as f64)).round() as u64).max(1);
        let slow = (((fast as f64) * (slow_core as f64) / (fast_core as f64)).round() as u64).max(1);

        Ok(FeeTiers { fast, medium, slow })
    }

    async fn fee_histogram(&self) -> Option<Vec<(f64, u64)>> {
        let result = match self.call(methods::FEE_HISTOGRAM, vec![]).await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "fee histogram unavailable");
                return None;
            }
        };

        let entries = result.as_array()?;
        let mut histogram = Vec::with_capacity(entries.len());
        for entry in entries {
            let pair = entry.as_array()?;
            let fee = pair.first()?.as_f64()?;
            let vsize = pair.get(1)?.as_u64()?;
            histogram.push((fee, vsize));
        }
        Some(histogram)
    }

    /// Confirmation estimate for an address's pending transaction: the
    /// first mempool entry's fee rate bucketed against the network tiers.
    pub async fn transaction_estimate(
        &self,
        mempool: &[MempoolEntry],
    ) -> Result<FeeSnapshot, ClientError> {
        let Some(pending) = mempool.first() else {
            return Ok(FeeSnapshot::default());
        };

        let details = self.get_transaction_verbose(&pending.tx_hash).await?;
        let confirmations = details.get("confirmations").and_then(Value::as_u64).unwrap_or(0);
        if confirmations != 0 {
            return Ok(FeeSnapshot::default());
        }

        let Some(vsize) = details.get("vsize").and_then(Value::as_u64).filter(|v| *v > 0) else {
            return Ok(FeeSnapshot::default());
        };

        let sat_per_vbyte = ((pending.fee as f64) / (vsize as f64)).round() as u64;
        let tiers = self.fee_tiers().await?;

        Ok(FeeSnapshot {
            eta: eta_label(sat_per_vbyte, &tiers).to_string(),
            sat_per_vbyte: Some(sat_per_vbyte),
        })
    }
}
