use async_trait::async_trait;
use coinbridge_types::{Coin, IncomingTx};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::HandlerError;

/// What a sender must target to deposit into a coin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum DepositTarget {
    /// Bitcoin-like: a fresh or static receiving address
    Address(String),
    /// Account-based: our account name; the sender attaches a memo
    Account(String),
}

impl DepositTarget {
    pub fn value(&self) -> &str {
        match self {
            DepositTarget::Address(v) | DepositTarget::Account(v) => v,
        }
    }
}

/// Result of a successful send or issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentTx {
    /// Transaction id on the destination network; not every network can
    /// report one
    pub txid: Option<String>,

    pub coin: String,

    /// Amount actually transferred, after any network fee the node deducts
    pub amount: Decimal,

    /// Network fee taken by the chain
    pub fee: Decimal,

    /// Sending address/account, if known
    pub from: Option<String>,
}

/// One raw fetch from the upstream, already filtered to canonical records.
///
/// `fetched` is the RAW record count retrieved before filtering: pagination
/// must terminate on the raw count, since filtering routinely discards
/// self-sends and transfers that are not ours.
#[derive(Debug, Clone)]
pub struct TxBatch {
    pub records: Vec<IncomingTx>,
    pub fetched: usize,
}

impl TxBatch {
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            fetched: 0,
        }
    }
}

/// Capability to read incoming transactions for one or more coins.
///
/// Implementations must exclude self-originated transfers and transfers not
/// addressed to the operator's own account/address, and must only return
/// records valid for the coin's contract/confirmation requirements.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Coins this instance is currently scanning. May shrink after `load`
    /// drops coins that are missing required settings.
    fn coins(&self) -> Vec<Coin>;

    /// Prepare internal state: open connections, drop misconfigured coins.
    async fn load(&self) -> Result<(), HandlerError>;

    /// Fetch up to `limit` raw records for `coin`, skipping the `offset`
    /// most recent, filtered down to canonical incoming transfers.
    async fn load_batch(
        &self,
        coin: &Coin,
        limit: usize,
        offset: usize,
    ) -> Result<TxBatch, HandlerError>;
}

/// Capability to move funds on a network: send, optionally issue, and the
/// read-only queries conversion needs.
///
/// Instances are shared read-only across workers; implementations must not
/// keep mutable per-call state.
#[async_trait]
pub trait Mover: Send + Sync {
    /// The coin this mover sends
    fn coin(&self) -> &Coin;

    async fn address_valid(&self, address: &str) -> bool;

    /// Where senders should deposit for this coin.
    async fn deposit_target(&self) -> Result<DepositTarget, HandlerError>;

    /// Balance of `address`, or of the operator hot wallet when `None`.
    async fn balance(&self, address: Option<&str>) -> Result<Decimal, HandlerError>;

    async fn send(
        &self,
        amount: Decimal,
        address: &str,
        memo: Option<&str>,
    ) -> Result<SentTx, HandlerError>;

    /// Mint new tokens to `address`. Only meaningful for issuable tokens.
    async fn issue(
        &self,
        _amount: Decimal,
        _address: &str,
        _memo: Option<&str>,
    ) -> Result<SentTx, HandlerError> {
        Err(HandlerError::IssueNotSupported(self.coin().symbol.clone()))
    }

    /// Try a normal send first; fall back to issuing when the hot wallet
    /// balance is insufficient and the token can be minted.
    async fn send_or_issue(
        &self,
        amount: Decimal,
        address: &str,
        memo: Option<&str>,
    ) -> Result<SentTx, HandlerError> {
        match self.send(amount, address, memo).await {
            Err(HandlerError::NotEnoughBalance { .. }) if self.coin().can_issue => {
                self.issue(amount, address, memo).await
            }
            other => other,
        }
    }

    /// Whether the network looks usable right now. A `false` here defers
    /// the conversion attempt; it is never an error.
    async fn health_check(&self) -> bool {
        true
    }
}
