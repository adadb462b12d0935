//! The subscription registry.
//!
//! One record per watched address, owned by the registry map. Each record
//! holds its own timers, so cancelling an address is local: drop the
//! record and its debounce/reconnect timers die with it. In-flight
//! fetches carry the generation they were started under; a record
//! replaced or removed in the meantime makes the completion a no-op, so a
//! superseded handler can never fire.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use ember_protocol::methods::SCRIPTHASH_SUBSCRIBE;
use ember_protocol::Notification;
use ember_types::{AddressState, BitcoinAddress, FeeSnapshot, UpdateSource};
use ember_utils::unix_now_millis;

use crate::backoff::{backoff_delay, MAX_RECONNECT_ATTEMPTS};
use crate::classify::{classify, ErrorClass};
use crate::source::ChainSource;
use crate::task::ScheduledTask;
use crate::MonitorError;

/// Debounce before a watch request hits the network.
pub const SUBSCRIBE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Re-watching an address unsubscribed more recently than this is a no-op.
pub const RESUBSCRIBE_SUPPRESSION: Duration = Duration::from_millis(300);

/// Overall bound on a manual refresh.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

/// Typed callbacks for one watched address.
pub trait AddressHandler: Send + Sync {
    fn on_update(&self, state: &AddressState, source: UpdateSource);

    fn on_error(&self, error: &MonitorError, class: ErrorClass);

    /// When true, push notifications are delivered only while the address
    /// has a positive unconfirmed balance (an incoming payment). The
    /// initial snapshot and manual refreshes are always delivered.
    fn incoming_only(&self) -> bool {
        true
    }
}

/// Lifecycle of a subscription record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Created, debounce running or first fetch in flight.
    Pending,
    /// Live and current.
    Active,
    /// Errored, but previously fetched data is still being shown.
    Stale,
    /// Errored with nothing to show, or permanently failed.
    Errored,
}

struct Subscription {
    scripthash: String,
    handler: Arc<dyn AddressHandler>,
    status: SubscriptionStatus,
    reconnect_attempts: u32,
    last_success_ms: Option<u64>,
    last_state: Option<AddressState>,
    server_busy: bool,
    /// Permanently failed (history beyond server limits); never retried.
    terminal: bool,
    /// Monotonic token tying in-flight work to this record incarnation.
    generation: u64,
    in_flight: bool,
    debounce: Option<ScheduledTask>,
    reconnect_timer: Option<ScheduledTask>,
}

/// Public view of one subscription.
#[derive(Clone, Debug)]
pub struct AddressStatus {
    pub address: BitcoinAddress,
    pub status: SubscriptionStatus,
    pub stale: bool,
    /// The address's balance cannot be known (server refuses to enumerate
    /// it); display "unknown", never zero.
    pub balance_unknown: bool,
    pub reconnect_attempts: u32,
    pub last_success_ms: Option<u64>,
}

/// Point-in-time view of the whole registry.
#[derive(Clone, Debug, Default)]
pub struct RegistrySnapshot {
    pub entries: Vec<AddressStatus>,
}

impl RegistrySnapshot {
    pub fn addresses(&self) -> Vec<&BitcoinAddress> {
        self.entries.iter().map(|e| &e.address).collect()
    }

    pub fn get(&self, address: &BitcoinAddress) -> Option<&AddressStatus> {
        self.entries.iter().find(|e| &e.address == address)
    }
}

enum Callback {
    Update(Arc<dyn AddressHandler>, AddressState),
    Error(Arc<dyn AddressHandler>, MonitorError, ErrorClass),
}

struct Inner {
    source: Arc<dyn ChainSource>,
    subs: Mutex<HashMap<BitcoinAddress, Subscription>>,
    recent_unsubscribes: Mutex<HashMap<BitcoinAddress, Instant>>,
    generation: AtomicU64,
    enabled: AtomicBool,
}

pub struct SubscriptionRegistry {
    inner: Arc<Inner>,
}

impl SubscriptionRegistry {
    pub fn new(source: Arc<dyn ChainSource>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                subs: Mutex::new(HashMap::new()),
                recent_unsubscribes: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                enabled: AtomicBool::new(true),
            }),
        }
    }

    /// Start watching an address. Idempotent: a second watch while a
    /// subscription is pending or active is a no-op, and re-watching an
    /// address unsubscribed within the suppression window is dropped to
    /// avoid subscribe/unsubscribe thrash during address changes.
    pub async fn watch(&self, address: BitcoinAddress, handler: Arc<dyn AddressHandler>) {
        if !self.inner.enabled.load(Ordering::SeqCst) {
            tracing::debug!("monitoring disabled, ignoring watch request");
            return;
        }

        let scripthash = match self.inner.source.scripthash(&address) {
            Ok(hash) => hash,
            Err(error) => {
                handler.on_error(&error, ErrorClass::Generic);
                return;
            }
        };

        {
            let recent = self.inner.recent_unsubscribes.lock().await;
            if let Some(at) = recent.get(&address) {
                if at.elapsed() < RESUBSCRIBE_SUPPRESSION {
                    tracing::debug!(
                        address = %address.abbrev(),
                        "skipping resubscription to recently unsubscribed address"
                    );
                    return;
                }
            }
        }

        let mut subs = self.inner.subs.lock().await;
        if let Some(existing) = subs.get(&address) {
            if existing.in_flight
                || matches!(
                    existing.status,
                    SubscriptionStatus::Pending | SubscriptionStatus::Active
                )
            {
                tracing::debug!(address = %address.abbrev(), "already watched, no-op");
                return;
            }
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        let debounce_address = address.clone();
        let debounce = ScheduledTask::once(SUBSCRIBE_DEBOUNCE, async move {
            inner.subscribe_attempt(debounce_address, generation).await;
        });

        tracing::debug!(address = %address.abbrev(), generation, "watch registered");
        subs.insert(
            address,
            Subscription {
                scripthash,
                handler,
                status: SubscriptionStatus::Pending,
                reconnect_attempts: 0,
                last_success_ms: None,
                last_state: None,
                server_busy: false,
                terminal: false,
                generation,
                in_flight: false,
                debounce: Some(debounce),
                reconnect_timer: None,
            },
        );
    }

    /// Stop watching an address: cancel its timers, invalidate in-flight
    /// work, record the unsubscribe time for the thrash guard, and tell
    /// the server (best effort).
    pub async fn unwatch(&self, address: &BitcoinAddress, reason: &str) {
        let removed = { self.inner.subs.lock().await.remove(address) };
        let Some(mut entry) = removed else {
            return;
        };
        if let Some(timer) = entry.debounce.take() {
            timer.cancel();
        }
        if let Some(timer) = entry.reconnect_timer.take() {
            timer.cancel();
        }

        self.inner
            .recent_unsubscribes
            .lock()
            .await
            .insert(address.clone(), Instant::now());
        tracing::debug!(address = %address.abbrev(), reason, "unwatched");

        if let Err(error) = self.inner.source.unsubscribe(&entry.scripthash).await {
            tracing::debug!(
                error = %error,
                "server-side unsubscribe failed, subscription removed locally anyway"
            );
        }
        // Dropping `entry` here cancels its debounce and reconnect timers.
    }

    /// Manual, timeout-bounded poll. Works for watched and unwatched
    /// addresses alike; on a watched address it also resets the
    /// reconnection bookkeeping on success.
    pub async fn refresh(&self, address: &BitcoinAddress) -> Result<AddressState, MonitorError> {
        if !self.inner.enabled.load(Ordering::SeqCst) {
            return Err(MonitorError::Disabled);
        }

        let scripthash = self.inner.source.scripthash(address)?;
        tracing::debug!(address = %address.abbrev(), "manual refresh (polling)");

        let result = match tokio::time::timeout(
            REFRESH_TIMEOUT,
            self.inner.fetch_state(&scripthash, false),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(MonitorError::Timeout),
        };

        match result {
            Ok(state) => {
                let mut subs = self.inner.subs.lock().await;
                if let Some(entry) = subs.get_mut(address) {
                    entry.status = SubscriptionStatus::Active;
                    entry.reconnect_attempts = 0;
                    entry.server_busy = false;
                    entry.reconnect_timer = None;
                    entry.last_success_ms = Some(unix_now_millis());
                    entry.last_state = Some(state.clone());
                }
                Ok(state)
            }
            Err(error) => {
                let class = classify(&error.to_string());
                let mut subs = self.inner.subs.lock().await;
                if let Some(entry) = subs.get_mut(address) {
                    if class == ErrorClass::ServerBusy {
                        entry.server_busy = true;
                    }
                    if class.is_terminal() {
                        entry.terminal = true;
                        entry.status = SubscriptionStatus::Errored;
                        entry.reconnect_timer = None;
                    } else if entry.last_state.is_some() {
                        entry.status = SubscriptionStatus::Stale;
                    }
                }
                Err(error)
            }
        }
    }

    /// Current subscription set and per-address staleness.
    pub async fn status(&self) -> RegistrySnapshot {
        let subs = self.inner.subs.lock().await;
        let entries = subs
            .iter()
            .map(|(address, entry)| AddressStatus {
                address: address.clone(),
                status: entry.status,
                stale: entry.status == SubscriptionStatus::Stale,
                balance_unknown: entry.terminal,
                reconnect_attempts: entry.reconnect_attempts,
                last_success_ms: entry.last_success_ms,
            })
            .collect();
        RegistrySnapshot { entries }
    }

    /// Drain the server-push channel, refetching and dispatching for each
    /// notification that maps to a watched address.
    pub fn spawn_notification_pump(
        &self,
        mut events: mpsc::Receiver<Notification>,
    ) -> tokio::task::JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event.method != SCRIPTHASH_SUBSCRIBE {
                    continue;
                }
                let Some(scripthash) = event
                    .params
                    .first()
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                else {
                    continue;
                };

                let target = {
                    let subs = inner.subs.lock().await;
                    subs.iter()
                        .find(|(_, entry)| entry.scripthash == scripthash)
                        .map(|(address, entry)| (address.clone(), entry.generation))
                };
                let Some((address, generation)) = target else {
                    tracing::debug!(%scripthash, "push for unwatched scripthash, ignoring");
                    continue;
                };

                tracing::debug!(address = %address.abbrev(), "subscription push received");
                let result = inner.fetch_state(&scripthash, false).await;
                Arc::clone(&inner)
                    .apply_outcome(&address, generation, result, UpdateSource::Subscription, true)
                    .await;
            }
        })
    }

    /// Disable the layer: unsubscribe every address, cancel every timer.
    pub async fn shutdown(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);

        let drained: Vec<(BitcoinAddress, Subscription)> =
            { self.inner.subs.lock().await.drain().collect() };

        for (address, mut entry) in drained {
            if let Some(timer) = entry.debounce.take() {
                timer.cancel();
            }
            if let Some(timer) = entry.reconnect_timer.take() {
                timer.cancel();
            }
            tracing::debug!(address = %address.abbrev(), "unsubscribing on shutdown");
            if let Err(error) = self.inner.source.unsubscribe(&entry.scripthash).await {
                tracing::debug!(error = %error, "server-side unsubscribe failed during shutdown");
            }
        }
    }

    /// Re-enable after a shutdown.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }
}

impl Inner {
    /// One subscription attempt. Guards: the record must still exist, be
    /// of the same incarnation, and have no other attempt in flight.
    ///
    /// Returns a boxed future to type-erase the reconnect recursion
    /// (`apply_outcome` schedules another `subscribe_attempt`), which the
    /// compiler otherwise cannot prove `Send` through the cycle.
    fn subscribe_attempt(
        self: Arc<Self>,
        address: BitcoinAddress,
        generation: u64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            let scripthash = {
                let mut subs = self.subs.lock().await;
                let Some(entry) = subs.get_mut(&address) else {
                    return;
                };
                if entry.generation != generation || entry.in_flight {
                    return;
                }
                entry.in_flight = true;
                entry.scripthash.clone()
            };

            tracing::debug!(address = %address.abbrev(), "subscribing");
            let result = self.fetch_state(&scripthash, true).await;
            self.apply_outcome(&address, generation, result, UpdateSource::Subscription, false)
                .await;
        })
    }

    /// Fetch the full address state. Balance and history are mandatory;
    /// mempool and the fee snapshot are best-effort extras only gathered
    /// while there is unconfirmed activity.
    async fn fetch_state(
        &self,
        scripthash: &str,
        establish_subscription: bool,
    ) -> Result<AddressState, MonitorError> {
        let balance = self.source.balance(scripthash).await?;
        let history = self.source.history(scripthash).await?;
        if establish_subscription {
            self.source.subscribe(scripthash).await?;
        }

        let mut mempool = Vec::new();
        let mut fee_snapshot = FeeSnapshot::default();
        if balance.unconfirmed != 0 {
            match self.source.mempool(scripthash).await {
                Ok(entries) => {
                    mempool = entries;
                    match self.source.fee_snapshot(&mempool).await {
                        Ok(snapshot) => fee_snapshot = snapshot,
                        Err(error) => {
                            tracing::debug!(error = %error, "fee snapshot unavailable");
                        }
                    }
                }
                Err(error) => tracing::debug!(error = %error, "mempool fetch failed"),
            }
        }

        Ok(AddressState {
            balance,
            history,
            mempool,
            fee_snapshot,
        })
    }

    /// Fold a fetch result into the record and decide which callback (if
    /// any) to run. Callbacks execute after the registry lock is released.
    async fn apply_outcome(
        self: Arc<Self>,
        address: &BitcoinAddress,
        generation: u64,
        result: Result<AddressState, MonitorError>,
        source: UpdateSource,
        push: bool,
    ) {
        let callback = {
            let mut subs = self.subs.lock().await;
            let Some(entry) = subs.get_mut(address) else {
                return;
            };
            if entry.generation != generation {
                tracing::debug!(
                    address = %address.abbrev(),
                    "discarding result from a superseded fetch"
                );
                return;
            }
            entry.in_flight = false;

            match result {
                Ok(state) => {
                    entry.status = SubscriptionStatus::Active;
                    entry.reconnect_attempts = 0;
                    entry.server_busy = false;
                    // May abort the very task running this call; harmless,
                    // since nothing awaits after the callback below.
                    entry.reconnect_timer = None;
                    entry.last_success_ms = Some(unix_now_millis());
                    entry.last_state = Some(state.clone());

                    let deliver = !push
                        || !entry.handler.incoming_only()
                        || state.balance.unconfirmed > 0;
                    if deliver {
                        Some(Callback::Update(Arc::clone(&entry.handler), state))
                    } else {
                        tracing::debug!(
                            address = %address.abbrev(),
                            "suppressing push for incoming-only watcher"
                        );
                        None
                    }
                }
                Err(error) => {
                    let class = classify(&error.to_string());
                    if class == ErrorClass::ServerBusy {
                        entry.server_busy = true;
                    }

                    if class.is_terminal() {
                        entry.terminal = true;
                        entry.status = SubscriptionStatus::Errored;
                        entry.reconnect_timer = None;
                        tracing::warn!(
                            address = %address.abbrev(),
                            "history exceeds server limits, monitoring stopped for this address"
                        );
                    } else {
                        entry.status = if entry.last_state.is_some() {
                            SubscriptionStatus::Stale
                        } else {
                            SubscriptionStatus::Errored
                        };

                        if entry.reconnect_attempts >= MAX_RECONNECT_ATTEMPTS {
                            tracing::warn!(
                                address = %address.abbrev(),
                                attempts = entry.reconnect_attempts,
                                "maximum reconnection attempts reached, giving up"
                            );
                        } else {
                            let delay = backoff_delay(entry.reconnect_attempts, entry.server_busy);
                            entry.reconnect_attempts += 1;
                            tracing::debug!(
                                address = %address.abbrev(),
                                attempt = entry.reconnect_attempts,
                                delay_ms = delay.as_millis() as u64,
                                busy = entry.server_busy,
                                "scheduling reconnection"
                            );
                            let inner = Arc::clone(&self);
                            let retry_address = address.clone();
                            entry.reconnect_timer = Some(ScheduledTask::once(delay, async move {
                                inner.subscribe_attempt(retry_address, generation).await;
                            }));
                        }
                    }

                    Some(Callback::Error(Arc::clone(&entry.handler), error, class))
                }
            }
        };

        match callback {
            Some(Callback::Update(handler, state)) => handler.on_update(&state, source),
            Some(Callback::Error(handler, error, class)) => handler.on_error(&error, class),
            None => {}
        }
    }
}
