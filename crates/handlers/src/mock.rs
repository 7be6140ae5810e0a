//! In-memory network handler used by tests and local development.
//!
//! One `MockChain` models every coin of the `"mock"` network type: seeded
//! incoming transfers, per-coin hot-wallet balances, and switches for
//! health, dead-API and injected RPC failures.

use async_trait::async_trait;
use coinbridge_config::ConfigSnapshot;
use coinbridge_sync::RetryPolicy;
use coinbridge_types::{Coin, IncomingTx, TxSource};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::warn;

use crate::{
    DepositTarget, HandlerError, HandlerFactory, HandlerSet, Loader, Mover, SentTx, TxBatch,
};

/// A transfer the mock network executed.
#[derive(Debug, Clone, PartialEq)]
pub struct SentRecord {
    pub coin: String,
    pub address: String,
    pub memo: Option<String>,
    pub amount: Decimal,
    pub issued: bool,
}

#[derive(Default)]
struct ChainState {
    txs: HashMap<String, Vec<IncomingTx>>,
    balances: HashMap<String, Decimal>,
    invalid_addresses: HashSet<String>,
    account_coins: HashSet<String>,
    healthy: bool,
    dead_api: bool,
    dead_coins: HashSet<String>,
    rpc_failures_remaining: u32,
    send_delay: Option<Duration>,
    next_txid: u64,
    sent: Vec<SentRecord>,
}

pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                healthy: true,
                ..ChainState::default()
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an incoming transfer for the scanner to find.
    pub fn push_tx(&self, tx: IncomingTx) {
        self.lock().txs.entry(tx.coin.clone()).or_default().push(tx);
    }

    pub fn set_balance(&self, coin: &str, amount: Decimal) {
        self.lock().balances.insert(coin.to_uppercase(), amount);
    }

    pub fn balance_of(&self, coin: &str) -> Decimal {
        self.lock()
            .balances
            .get(&coin.to_uppercase())
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Treat a coin as account-based: its loader requires `our_account` and
    /// its deposit target is an account name.
    pub fn mark_account_based(&self, coin: &str) {
        self.lock().account_coins.insert(coin.to_uppercase());
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.lock().healthy = healthy;
    }

    pub fn set_dead_api(&self, dead: bool) {
        self.lock().dead_api = dead;
    }

    /// Mark a single coin's upstream as hard-down.
    pub fn set_coin_dead(&self, coin: &str) {
        self.lock().dead_coins.insert(coin.to_uppercase());
    }

    pub fn invalidate_address(&self, address: &str) {
        self.lock().invalid_addresses.insert(address.to_string());
    }

    /// Make the next `n` RPC-backed calls fail with a transient error.
    pub fn fail_next_rpc(&self, n: u32) {
        self.lock().rpc_failures_remaining = n;
    }

    /// Hold each send for `delay` to widen race windows in tests.
    pub fn set_send_delay(&self, delay: Duration) {
        self.lock().send_delay = Some(delay);
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.lock().sent.clone()
    }

    pub fn send_count(&self) -> usize {
        self.lock().sent.len()
    }

    fn take_rpc_failure(&self) -> bool {
        let mut state = self.lock();
        if state.rpc_failures_remaining > 0 {
            state.rpc_failures_remaining -= 1;
            true
        } else {
            false
        }
    }
}

pub struct MockLoader {
    chain: Arc<MockChain>,
    active: RwLock<Vec<Coin>>,
    retry: RetryPolicy,
}

impl MockLoader {
    pub fn new(chain: Arc<MockChain>, coins: Vec<Coin>) -> Self {
        Self {
            chain,
            active: RwLock::new(coins),
            retry: RetryPolicy::new(3, Duration::from_millis(10)),
        }
    }

    fn fetch_batch(&self, coin: &Coin, limit: usize, offset: usize) -> Result<TxBatch, HandlerError> {
        if self.chain.take_rpc_failure() {
            return Err(HandlerError::Rpc("mock rpc failure".into()));
        }

        let state = self.chain.lock();
        if state.dead_api || state.dead_coins.contains(&coin.symbol) {
            return Err(HandlerError::DeadApi(format!(
                "mock api for {} is not responding",
                coin.symbol
            )));
        }

        let all = state.txs.get(&coin.symbol).cloned().unwrap_or_default();
        let raw: Vec<IncomingTx> = all.into_iter().skip(offset).take(limit).collect();
        let fetched = raw.len();

        let our_account = coin.our_account.as_deref();
        let records = raw
            .into_iter()
            .filter(|tx| match &tx.source {
                TxSource::Account {
                    from_account,
                    to_account,
                    ..
                } => {
                    // Drop self-sends and transfers that are not ours
                    Some(from_account.as_str()) != our_account
                        && Some(to_account.as_str()) == our_account
                }
                TxSource::Address { .. } => true,
            })
            .collect();

        Ok(TxBatch { records, fetched })
    }
}

#[async_trait]
impl Loader for MockLoader {
    fn coins(&self) -> Vec<Coin> {
        self.active.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn load(&self) -> Result<(), HandlerError> {
        let account_coins: HashSet<String> = self.chain.lock().account_coins.clone();
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        active.retain(|coin| {
            if account_coins.contains(&coin.symbol) && coin.our_account.is_none() {
                warn!(
                    coin = %coin.symbol,
                    "coin has no our_account set, refusing to load transactions"
                );
                return false;
            }
            true
        });
        Ok(())
    }

    async fn load_batch(
        &self,
        coin: &Coin,
        limit: usize,
        offset: usize,
    ) -> Result<TxBatch, HandlerError> {
        self.retry
            .run("mock.load_batch", HandlerError::is_transient, || {
                let batch = self.fetch_batch(coin, limit, offset);
                async move { batch }
            })
            .await
    }
}

pub struct MockMover {
    coin: Coin,
    chain: Arc<MockChain>,
}

impl MockMover {
    pub fn new(chain: Arc<MockChain>, coin: Coin) -> Self {
        Self { coin, chain }
    }

    fn record_send(
        &self,
        amount: Decimal,
        address: &str,
        memo: Option<&str>,
        issued: bool,
    ) -> SentTx {
        let mut state = self.chain.lock();
        state.next_txid += 1;
        let txid = format!("mock-txid-{}", state.next_txid);
        state.sent.push(SentRecord {
            coin: self.coin.symbol.clone(),
            address: address.to_string(),
            memo: memo.map(str::to_string),
            amount,
            issued,
        });
        SentTx {
            txid: Some(txid),
            coin: self.coin.symbol.clone(),
            amount,
            fee: Decimal::ZERO,
            from: self
                .coin
                .our_account
                .clone()
                .or_else(|| Some("mock-hot-wallet".to_string())),
        }
    }
}

#[async_trait]
impl Mover for MockMover {
    fn coin(&self) -> &Coin {
        &self.coin
    }

    async fn address_valid(&self, address: &str) -> bool {
        !self.chain.lock().invalid_addresses.contains(address)
    }

    async fn deposit_target(&self) -> Result<DepositTarget, HandlerError> {
        let account_based = self.chain.lock().account_coins.contains(&self.coin.symbol);
        if account_based {
            let account =
                self.coin
                    .our_account
                    .clone()
                    .ok_or_else(|| HandlerError::MissingTokenMetadata {
                        coin: self.coin.symbol.clone(),
                        detail: "our_account is required for account-based coins".into(),
                    })?;
            Ok(DepositTarget::Account(account))
        } else {
            Ok(DepositTarget::Address(format!(
                "mock-deposit-{}",
                self.coin.symbol.to_lowercase()
            )))
        }
    }

    async fn balance(&self, _address: Option<&str>) -> Result<Decimal, HandlerError> {
        Ok(self.chain.balance_of(&self.coin.symbol))
    }

    async fn send(
        &self,
        amount: Decimal,
        address: &str,
        memo: Option<&str>,
    ) -> Result<SentTx, HandlerError> {
        if self.chain.take_rpc_failure() {
            return Err(HandlerError::Rpc("mock rpc failure".into()));
        }
        if !self.address_valid(address).await {
            return Err(HandlerError::AccountNotFound(format!(
                "invalid {} address {}",
                self.coin.symbol, address
            )));
        }

        let delay = self.chain.lock().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.chain.lock();
        let available = state
            .balances
            .get(&self.coin.symbol)
            .copied()
            .unwrap_or(Decimal::ZERO);
        if available < amount {
            return Err(HandlerError::NotEnoughBalance {
                needed: amount,
                available,
            });
        }
        state.balances.insert(self.coin.symbol.clone(), available - amount);
        drop(state);

        Ok(self.record_send(amount, address, memo, false))
    }

    async fn issue(
        &self,
        amount: Decimal,
        address: &str,
        memo: Option<&str>,
    ) -> Result<SentTx, HandlerError> {
        if !self.coin.can_issue {
            return Err(HandlerError::IssueNotSupported(self.coin.symbol.clone()));
        }
        if !self.address_valid(address).await {
            return Err(HandlerError::AccountNotFound(format!(
                "invalid {} address {}",
                self.coin.symbol, address
            )));
        }
        Ok(self.record_send(amount, address, memo, true))
    }

    async fn health_check(&self) -> bool {
        let state = self.chain.lock();
        state.healthy && !state.dead_api
    }
}

/// Factory wiring the mock chain into the handler registry under the
/// `"mock"` network type.
pub struct MockHandlerFactory {
    chain: Arc<MockChain>,
}

impl MockHandlerFactory {
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self { chain }
    }
}

impl HandlerFactory for MockHandlerFactory {
    fn network_type(&self) -> &str {
        "mock"
    }

    fn build(
        &self,
        coins: &[Coin],
        _snapshot: &Arc<ConfigSnapshot>,
    ) -> Result<HandlerSet, HandlerError> {
        let mut set = HandlerSet::empty();
        set.loader = Some(Arc::new(MockLoader::new(
            Arc::clone(&self.chain),
            coins.to_vec(),
        )));
        for coin in coins {
            set.movers.insert(
                coin.symbol.clone(),
                Arc::new(MockMover::new(Arc::clone(&self.chain), coin.clone())),
            );
        }
        Ok(set)
    }
}
