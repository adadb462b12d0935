//! The fee-bump state machine.
//!
//! Linear, no cycles: `Evaluating → ReadyToBuild → HexReady →
//! Broadcasting → Done`, with `Failed` absorbing build and broadcast
//! errors (both leave the candidate retryable) and `NotBumpable` as the
//! ordinary terminal outcome of an ineligible transaction — not an error.

use std::sync::Arc;
use std::time::Duration;

use ember_client::ConnectionReady;
use ember_types::Txid;

use crate::capabilities::{BuiltTransaction, WalletOps, FINAL_SEQUENCE};
use crate::BumpError;

/// Added to the observed fee rate before a bump is considered buildable.
/// One sat makes a real difference: rounding can otherwise leave the
/// replacement's fee insufficient.
pub const FEE_RATE_SAFETY_MARGIN: u64 = 1;

/// Memo written for the child transaction of a CPFP bump.
pub const CPFP_MEMO: &str = "Child pays for parent (CPFP)";

/// Prefix prepended to the prior memo when a transaction is cancelled.
pub const CANCEL_MEMO_PREFIX: &str = "Cancelled: ";

/// Wait before refreshing the wallet's transactions after a successful
/// broadcast, giving the network time to propagate the replacement.
pub const POST_BROADCAST_REFRESH_DELAY: Duration = Duration::from_secs(4);

/// Which bump flow is being attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BumpKind {
    Cpfp,
    RbfBump,
    RbfCancel,
}

/// Stage of one bump candidate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BumpStage {
    Evaluating,
    /// Preconditions unmet. Normal outcome, terminal.
    NotBumpable,
    /// Eligible; a rate strictly above `min_rate` may be built.
    ReadyToBuild { min_rate: u64 },
    /// Signed hex awaiting explicit user-triggered broadcast.
    HexReady { hex: String, new_txid: Txid },
    Broadcasting,
    Done { new_txid: Txid },
    /// Build or broadcast failed; the candidate stays retryable.
    Failed { message: String },
}

impl BumpStage {
    fn name(&self) -> &'static str {
        match self {
            Self::Evaluating => "evaluating",
            Self::NotBumpable => "not-bumpable",
            Self::ReadyToBuild { .. } => "ready-to-build",
            Self::HexReady { .. } => "hex-ready",
            Self::Broadcasting => "broadcasting",
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
        }
    }
}

/// One user-initiated bump attempt, created per action and discarded
/// after the broadcast resolves.
#[derive(Clone, Debug)]
pub struct BumpCandidate {
    txid: Txid,
    kind: BumpKind,
    stage: BumpStage,
    min_rate: Option<u64>,
    built: Option<BuiltTransaction>,
}

impl BumpCandidate {
    pub fn txid(&self) -> &Txid {
        &self.txid
    }

    pub fn kind(&self) -> BumpKind {
        self.kind
    }

    pub fn stage(&self) -> &BumpStage {
        &self.stage
    }

    /// Floor the requested rate must strictly exceed, once evaluated.
    pub fn min_rate(&self) -> Option<u64> {
        self.min_rate
    }

    pub fn built(&self) -> Option<&BuiltTransaction> {
        self.built.as_ref()
    }
}

pub struct FeeBumpEngine {
    wallet: Arc<dyn WalletOps>,
}

impl FeeBumpEngine {
    pub fn new(wallet: Arc<dyn WalletOps>) -> Self {
        Self { wallet }
    }

    /// Evaluate eligibility for a bump of the given kind.
    ///
    /// Any unmet precondition (and any failure to even check one)
    /// resolves to `NotBumpable`.
    pub async fn evaluate(&self, txid: Txid, kind: BumpKind) -> BumpCandidate {
        let mut candidate = BumpCandidate {
            txid,
            kind,
            stage: BumpStage::Evaluating,
            min_rate: None,
            built: None,
        };

        let eligible = match self.check_eligibility(&candidate.txid, kind).await {
            Ok(eligible) => eligible,
            Err(error) => {
                tracing::debug!(txid = %candidate.txid, error = %error, "eligibility check failed");
                false
            }
        };

        if !eligible {
            candidate.stage = BumpStage::NotBumpable;
            return candidate;
        }

        match self.wallet.implied_fee_rate(&candidate.txid).await {
            Ok(rate) => {
                let min_rate = rate + FEE_RATE_SAFETY_MARGIN;
                candidate.min_rate = Some(min_rate);
                candidate.stage = BumpStage::ReadyToBuild { min_rate };
            }
            Err(error) => {
                tracing::debug!(txid = %candidate.txid, error = %error, "fee rate unavailable");
                candidate.stage = BumpStage::NotBumpable;
            }
        }

        candidate
    }

    async fn check_eligibility(&self, txid: &Txid, kind: BumpKind) -> Result<bool, BumpError> {
        if !self.wallet.supports_fee_bump() {
            return Ok(false);
        }
        if self.wallet.confirmations(txid).await? != 0 {
            return Ok(false);
        }

        match kind {
            BumpKind::Cpfp => self.wallet.is_to_us(txid).await,
            BumpKind::RbfBump => Ok(self.wallet.is_ours(txid).await?
                && self.wallet.max_sequence(txid).await? < FINAL_SEQUENCE
                && self.wallet.can_bump(txid).await?),
            BumpKind::RbfCancel => Ok(self.wallet.is_ours(txid).await?
                && self.wallet.max_sequence(txid).await? < FINAL_SEQUENCE
                && self.wallet.can_cancel(txid).await?),
        }
    }

    /// Build the replacement at `requested_rate`.
    ///
    /// The rate must strictly exceed the candidate's floor; that is
    /// checked before any wallet call. Construction errors move the
    /// candidate to `Failed` but leave it retryable at a different rate.
    pub async fn build(
        &self,
        candidate: &mut BumpCandidate,
        requested_rate: u64,
    ) -> Result<(), BumpError> {
        let min_rate = match (&candidate.stage, candidate.min_rate) {
            (BumpStage::ReadyToBuild { min_rate }, _) => *min_rate,
            // Retry after a failed build keeps the original floor.
            (BumpStage::Failed { .. }, Some(min_rate)) => min_rate,
            (stage, _) => return Err(BumpError::WrongStage(stage.name())),
        };

        if requested_rate <= min_rate {
            return Err(BumpError::FeeRateTooLow {
                requested: requested_rate,
                min: min_rate,
            });
        }

        let result = match candidate.kind {
            BumpKind::Cpfp => self.wallet.create_cpfp_bump(&candidate.txid, requested_rate).await,
            BumpKind::RbfBump => self.wallet.create_rbf_bump(&candidate.txid, requested_rate).await,
            BumpKind::RbfCancel => {
                self.wallet.create_rbf_cancel(&candidate.txid, requested_rate).await
            }
        };

        match result {
            Ok(built) => {
                tracing::info!(
                    txid = %candidate.txid,
                    new_txid = %built.txid,
                    rate = requested_rate,
                    "replacement built"
                );
                candidate.stage = BumpStage::HexReady {
                    hex: built.hex.clone(),
                    new_txid: built.txid.clone(),
                };
                candidate.built = Some(built);
                Ok(())
            }
            Err(error) => {
                tracing::warn!(txid = %candidate.txid, error = %error, "build failed");
                candidate.stage = BumpStage::Failed {
                    message: error.to_string(),
                };
                Err(error)
            }
        }
    }

    /// Broadcast previously built hex. User-triggered; never retried
    /// automatically; a failure re-enables retry at the call site.
    pub async fn broadcast(
        &self,
        candidate: &mut BumpCandidate,
        gate: &dyn ConnectionReady,
    ) -> Result<Txid, BumpError> {
        if !matches!(
            candidate.stage,
            BumpStage::HexReady { .. } | BumpStage::Failed { .. }
        ) {
            return Err(BumpError::WrongStage(candidate.stage.name()));
        }
        let built = candidate
            .built
            .clone()
            .ok_or(BumpError::WrongStage("nothing built"))?;

        candidate.stage = BumpStage::Broadcasting;

        if !gate.wait_until_ready().await {
            candidate.stage = BumpStage::Failed {
                message: BumpError::NotConnected.to_string(),
            };
            return Err(BumpError::NotConnected);
        }

        match self.wallet.broadcast_tx(&built.hex).await {
            Ok(true) => {
                self.after_success(candidate, &built);
                candidate.stage = BumpStage::Done {
                    new_txid: built.txid.clone(),
                };
                Ok(built.txid)
            }
            Ok(false) => {
                let error = BumpError::BroadcastFailed("rejected by the network".into());
                candidate.stage = BumpStage::Failed {
                    message: error.to_string(),
                };
                Err(error)
            }
            Err(error) => {
                candidate.stage = BumpStage::Failed {
                    message: error.to_string(),
                };
                Err(error)
            }
        }
    }

    /// Post-broadcast side effects: memo bookkeeping for the new id,
    /// watcher registration, and a delayed transaction refresh.
    fn after_success(&self, candidate: &BumpCandidate, built: &BuiltTransaction) {
        let memo = match candidate.kind {
            BumpKind::Cpfp => Some(CPFP_MEMO.to_string()),
            BumpKind::RbfCancel => {
                let prior = self.wallet.tx_memo(&candidate.txid).unwrap_or_default();
                Some(format!("{CANCEL_MEMO_PREFIX}{prior}"))
            }
            BumpKind::RbfBump => self.wallet.tx_memo(&candidate.txid),
        };
        if let Some(memo) = memo {
            self.wallet.set_tx_memo(&built.txid, &memo);
        }

        self.wallet.register_watch(&built.txid);

        let wallet = Arc::clone(&self.wallet);
        tokio::spawn(async move {
            tokio::time::sleep(POST_BROADCAST_REFRESH_DELAY).await;
            wallet.refresh_transactions().await;
        });

        tracing::info!(new_txid = %built.txid, kind = ?candidate.kind, "bump broadcast succeeded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    fn txid(byte: char) -> Txid {
        Txid::new(byte.to_string().repeat(64)).unwrap()
    }

    struct MockWallet {
        supports: bool,
        confirmations: u32,
        to_us: bool,
        ours: bool,
        max_sequence: u32,
        can_bump: bool,
        can_cancel: bool,
        fee_rate: u64,
        build_error: Mutex<Option<String>>,
        broadcast_result: Mutex<Result<bool, String>>,
        build_calls: AtomicUsize,
        broadcast_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
        watched: Mutex<Vec<Txid>>,
        memos: Mutex<HashMap<String, String>>,
    }

    impl MockWallet {
        fn bumpable() -> Self {
            Self {
                supports: true,
                confirmations: 0,
                to_us: true,
                ours: true,
                max_sequence: 0xFFFF_FFFD,
                can_bump: true,
                can_cancel: true,
                fee_rate: 5,
                build_error: Mutex::new(None),
                broadcast_result: Mutex::new(Ok(true)),
                build_calls: AtomicUsize::new(0),
                broadcast_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
                watched: Mutex::new(vec![]),
                memos: Mutex::new(HashMap::new()),
            }
        }

        fn built(&self) -> BuiltTransaction {
            BuiltTransaction {
                hex: "02000000beef".into(),
                txid: txid('b'),
            }
        }
    }

    #[async_trait]
    impl WalletOps for MockWallet {
        fn supports_fee_bump(&self) -> bool {
            self.supports
        }

        async fn confirmations(&self, _txid: &Txid) -> Result<u32, BumpError> {
            Ok(self.confirmations)
        }

        async fn is_to_us(&self, _txid: &Txid) -> Result<bool, BumpError> {
            Ok(self.to_us)
        }

        async fn is_ours(&self, _txid: &Txid) -> Result<bool, BumpError> {
            Ok(self.ours)
        }

        async fn max_sequence(&self, _txid: &Txid) -> Result<u32, BumpError> {
            Ok(self.max_sequence)
        }

        async fn can_bump(&self, _txid: &Txid) -> Result<bool, BumpError> {
            Ok(self.can_bump)
        }

        async fn can_cancel(&self, _txid: &Txid) -> Result<bool, BumpError> {
            Ok(self.can_cancel)
        }

        async fn implied_fee_rate(&self, _txid: &Txid) -> Result<u64, BumpError> {
            Ok(self.fee_rate)
        }

        async fn create_cpfp_bump(
            &self,
            _txid: &Txid,
            _rate: u64,
        ) -> Result<BuiltTransaction, BumpError> {
            self.build_calls.fetch_add(1, Ordering::SeqCst);
            match self.build_error.lock().unwrap().clone() {
                Some(message) => Err(BumpError::Wallet(message)),
                None => Ok(self.built()),
            }
        }

        async fn create_rbf_bump(
            &self,
            txid: &Txid,
            rate: u64,
        ) -> Result<BuiltTransaction, BumpError> {
            self.create_cpfp_bump(txid, rate).await
        }

        async fn create_rbf_cancel(
            &self,
            txid: &Txid,
            rate: u64,
        ) -> Result<BuiltTransaction, BumpError> {
            self.create_cpfp_bump(txid, rate).await
        }

        async fn broadcast_tx(&self, _hex: &str) -> Result<bool, BumpError> {
            self.broadcast_calls.fetch_add(1, Ordering::SeqCst);
            match self.broadcast_result.lock().unwrap().clone() {
                Ok(accepted) => Ok(accepted),
                Err(message) => Err(BumpError::Wallet(message)),
            }
        }

        fn tx_memo(&self, txid: &Txid) -> Option<String> {
            self.memos.lock().unwrap().get(txid.as_str()).cloned()
        }

        fn set_tx_memo(&self, txid: &Txid, memo: &str) {
            self.memos
                .lock()
                .unwrap()
                .insert(txid.as_str().to_string(), memo.to_string());
        }

        fn register_watch(&self, txid: &Txid) {
            self.watched.lock().unwrap().push(txid.clone());
        }

        async fn refresh_transactions(&self) {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct AlwaysReady;

    #[async_trait]
    impl ConnectionReady for AlwaysReady {
        async fn wait_until_ready(&self) -> bool {
            true
        }
    }

    struct NeverReady;

    #[async_trait]
    impl ConnectionReady for NeverReady {
        async fn wait_until_ready(&self) -> bool {
            false
        }
    }

    fn engine(wallet: Arc<MockWallet>) -> FeeBumpEngine {
        FeeBumpEngine::new(wallet)
    }

    #[tokio::test]
    async fn eligible_cpfp_exposes_floor_of_rate_plus_one() {
        let wallet = Arc::new(MockWallet::bumpable());
        let candidate = engine(wallet).evaluate(txid('a'), BumpKind::Cpfp).await;

        assert_eq!(candidate.stage(), &BumpStage::ReadyToBuild { min_rate: 6 });
        assert_eq!(candidate.min_rate(), Some(6));
    }

    #[tokio::test]
    async fn unsupported_wallet_type_is_not_bumpable() {
        let mut wallet = MockWallet::bumpable();
        wallet.supports = false;
        let candidate = engine(Arc::new(wallet))
            .evaluate(txid('a'), BumpKind::RbfBump)
            .await;
        assert_eq!(candidate.stage(), &BumpStage::NotBumpable);
    }

    #[tokio::test]
    async fn confirmed_transaction_is_not_bumpable() {
        let mut wallet = MockWallet::bumpable();
        wallet.confirmations = 2;
        let candidate = engine(Arc::new(wallet))
            .evaluate(txid('a'), BumpKind::Cpfp)
            .await;
        assert_eq!(candidate.stage(), &BumpStage::NotBumpable);
    }

    #[tokio::test]
    async fn final_sequence_resolves_to_not_bumpable_not_failed() {
        let mut wallet = MockWallet::bumpable();
        wallet.max_sequence = FINAL_SEQUENCE;
        let candidate = engine(Arc::new(wallet))
            .evaluate(txid('a'), BumpKind::RbfBump)
            .await;

        assert_eq!(candidate.stage(), &BumpStage::NotBumpable);
        assert!(!matches!(candidate.stage(), BumpStage::Failed { .. }));
    }

    #[tokio::test]
    async fn received_transaction_is_not_rbf_bumpable() {
        let mut wallet = MockWallet::bumpable();
        wallet.ours = false;
        let candidate = engine(Arc::new(wallet))
            .evaluate(txid('a'), BumpKind::RbfBump)
            .await;
        assert_eq!(candidate.stage(), &BumpStage::NotBumpable);
    }

    #[tokio::test]
    async fn cancel_needs_cancelable_judgment() {
        let mut wallet = MockWallet::bumpable();
        wallet.can_cancel = false;
        let candidate = engine(Arc::new(wallet))
            .evaluate(txid('a'), BumpKind::RbfCancel)
            .await;
        assert_eq!(candidate.stage(), &BumpStage::NotBumpable);
    }

    #[tokio::test]
    async fn sent_transaction_is_not_cpfp_eligible() {
        let mut wallet = MockWallet::bumpable();
        wallet.to_us = false;
        let candidate = engine(Arc::new(wallet))
            .evaluate(txid('a'), BumpKind::Cpfp)
            .await;
        assert_eq!(candidate.stage(), &BumpStage::NotBumpable);
    }

    #[tokio::test]
    async fn low_rate_rejected_before_any_wallet_call() {
        let wallet = Arc::new(MockWallet::bumpable());
        let engine = engine(wallet.clone());
        let mut candidate = engine.evaluate(txid('a'), BumpKind::Cpfp).await;

        // Floor is 6 (rate 5 + margin); 4 and the floor itself are both
        // rejected without touching the wallet.
        for rate in [4, 6] {
            let err = engine.build(&mut candidate, rate).await.unwrap_err();
            assert!(matches!(err, BumpError::FeeRateTooLow { min: 6, .. }));
        }
        assert_eq!(wallet.build_calls.load(Ordering::SeqCst), 0);

        // A strictly higher rate builds.
        engine.build(&mut candidate, 10).await.unwrap();
        assert!(matches!(candidate.stage(), BumpStage::HexReady { .. }));
        assert_eq!(wallet.build_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn build_error_fails_but_allows_retry() {
        let wallet = Arc::new(MockWallet::bumpable());
        let engine = engine(wallet.clone());
        let mut candidate = engine.evaluate(txid('a'), BumpKind::RbfBump).await;

        *wallet.build_error.lock().unwrap() = Some("insufficient funds for the new fee".into());
        let err = engine.build(&mut candidate, 12).await.unwrap_err();
        assert!(err.to_string().contains("insufficient funds"));
        match candidate.stage() {
            BumpStage::Failed { message } => assert!(message.contains("insufficient funds")),
            other => panic!("expected Failed, got {other:?}"),
        }

        // Retrying from Failed with a saner rate succeeds.
        *wallet.build_error.lock().unwrap() = None;
        engine.build(&mut candidate, 8).await.unwrap();
        assert!(matches!(candidate.stage(), BumpStage::HexReady { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cpfp_broadcast_writes_memo_watches_and_schedules_refresh() {
        let wallet = Arc::new(MockWallet::bumpable());
        let engine = engine(wallet.clone());
        let mut candidate = engine.evaluate(txid('a'), BumpKind::Cpfp).await;
        engine.build(&mut candidate, 10).await.unwrap();

        let new_txid = engine.broadcast(&mut candidate, &AlwaysReady).await.unwrap();
        assert_eq!(new_txid, txid('b'));
        assert_eq!(candidate.stage(), &BumpStage::Done { new_txid: txid('b') });

        assert_eq!(
            wallet.tx_memo(&txid('b')).as_deref(),
            Some("Child pays for parent (CPFP)")
        );
        assert_eq!(wallet.watched.lock().unwrap().as_slice(), &[txid('b')]);

        // The refresh is deliberately delayed ~4s.
        assert_eq!(wallet.refresh_calls.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(wallet.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_broadcast_prefixes_prior_memo() {
        let wallet = Arc::new(MockWallet::bumpable());
        wallet.set_tx_memo(&txid('a'), "rent payment");

        let engine = engine(wallet.clone());
        let mut candidate = engine.evaluate(txid('a'), BumpKind::RbfCancel).await;
        engine.build(&mut candidate, 9).await.unwrap();
        engine.broadcast(&mut candidate, &AlwaysReady).await.unwrap();

        assert_eq!(
            wallet.tx_memo(&txid('b')).as_deref(),
            Some("Cancelled: rent payment")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rbf_bump_carries_memo_over() {
        let wallet = Arc::new(MockWallet::bumpable());
        wallet.set_tx_memo(&txid('a'), "coffee fund");

        let engine = engine(wallet.clone());
        let mut candidate = engine.evaluate(txid('a'), BumpKind::RbfBump).await;
        engine.build(&mut candidate, 9).await.unwrap();
        engine.broadcast(&mut candidate, &AlwaysReady).await.unwrap();

        assert_eq!(wallet.tx_memo(&txid('b')).as_deref(), Some("coffee fund"));
    }

    #[tokio::test]
    async fn rejected_broadcast_is_retryable() {
        let wallet = Arc::new(MockWallet::bumpable());
        *wallet.broadcast_result.lock().unwrap() = Ok(false);

        let engine = engine(wallet.clone());
        let mut candidate = engine.evaluate(txid('a'), BumpKind::RbfBump).await;
        engine.build(&mut candidate, 9).await.unwrap();

        let err = engine
            .broadcast(&mut candidate, &AlwaysReady)
            .await
            .unwrap_err();
        assert!(matches!(err, BumpError::BroadcastFailed(_)));
        assert!(matches!(candidate.stage(), BumpStage::Failed { .. }));

        // Retry after the network recovers.
        *wallet.broadcast_result.lock().unwrap() = Ok(true);
        engine.broadcast(&mut candidate, &AlwaysReady).await.unwrap();
        assert!(matches!(candidate.stage(), BumpStage::Done { .. }));
        assert_eq!(wallet.broadcast_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn broadcast_without_connection_fails_fast() {
        let wallet = Arc::new(MockWallet::bumpable());
        let engine = engine(wallet.clone());
        let mut candidate = engine.evaluate(txid('a'), BumpKind::Cpfp).await;
        engine.build(&mut candidate, 10).await.unwrap();

        let err = engine
            .broadcast(&mut candidate, &NeverReady)
            .await
            .unwrap_err();
        assert!(matches!(err, BumpError::NotConnected));
        assert_eq!(wallet.broadcast_calls.load(Ordering::SeqCst), 0);
        assert!(matches!(candidate.stage(), BumpStage::Failed { .. }));
    }

    #[tokio::test]
    async fn broadcast_requires_built_hex() {
        let wallet = Arc::new(MockWallet::bumpable());
        let engine = engine(wallet);
        let mut candidate = engine.evaluate(txid('a'), BumpKind::Cpfp).await;

        let err = engine
            .broadcast(&mut candidate, &AlwaysReady)
            .await
            .unwrap_err();
        assert!(matches!(err, BumpError::WrongStage(_)));
    }
}
