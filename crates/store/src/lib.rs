pub mod memory;
pub mod sqlite;

pub use memory::*;
pub use sqlite::*;

use async_trait::async_trait;
use coinbridge_types::{
    AddressAccountMap, CoinFlags, CoinPair, Conversion, Deposit, DepositKey, DepositStatus,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate deposit ({txid}, {coin}, {vout})")]
    DuplicateDeposit { txid: String, coin: String, vout: u32 },

    #[error("a conversion already exists for deposit {deposit_id}")]
    DuplicateConversion { deposit_id: i64 },

    #[error("duplicate coin pair {from_coin} -> {to_coin}")]
    DuplicatePair { from_coin: String, to_coin: String },

    #[error("duplicate address map for ({coin}, {address})")]
    DuplicateAddressMap { coin: String, address: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// The single source of truth for deposits, conversions and routing rows.
///
/// Uniqueness guarantees are part of the contract, not an optimisation:
/// (txid, coin, vout) on deposits, one conversion per deposit,
/// (from, to) on pairs, and (coin, address, memo) on address maps. Every
/// backend must enforce them atomically.
#[async_trait]
pub trait BridgeStore: Send + Sync {
    /// Insert a new deposit, returning its assigned id. Re-inserting the
    /// same (txid, coin, vout) fails with [`StoreError::DuplicateDeposit`].
    async fn insert_deposit(&self, deposit: &Deposit) -> Result<i64, StoreError>;

    async fn deposit(&self, id: i64) -> Result<Option<Deposit>, StoreError>;

    async fn find_deposit(&self, key: &DepositKey) -> Result<Option<Deposit>, StoreError>;

    /// Replace a deposit row. The caller holds the deposit's lock.
    async fn update_deposit(&self, deposit: &Deposit) -> Result<(), StoreError>;

    /// Deposits in `status`, oldest first, at most `limit` rows.
    async fn deposits_by_status(
        &self,
        status: DepositStatus,
        limit: usize,
    ) -> Result<Vec<Deposit>, StoreError>;

    /// How many `mapped` deposits are waiting to be converted into `to_coin`.
    async fn count_mapped_to(&self, to_coin: &str) -> Result<usize, StoreError>;

    /// Insert the conversion for a deposit. At most one may ever exist.
    async fn insert_conversion(&self, conversion: &Conversion) -> Result<i64, StoreError>;

    async fn conversion_for_deposit(
        &self,
        deposit_id: i64,
    ) -> Result<Option<Conversion>, StoreError>;

    async fn insert_pair(&self, pair: &CoinPair) -> Result<(), StoreError>;

    async fn pair(&self, from_coin: &str, to_coin: &str) -> Result<Option<CoinPair>, StoreError>;

    async fn pairs_from(&self, from_coin: &str) -> Result<Vec<CoinPair>, StoreError>;

    async fn insert_address_map(&self, map: &AddressAccountMap) -> Result<(), StoreError>;

    /// Routing lookup for memo-less networks. A non-empty `memo` must match
    /// the mapped memo exactly; with no memo, the first entry for
    /// (coin, address) wins.
    async fn find_address_map(
        &self,
        coin: &str,
        address: &str,
        memo: Option<&str>,
    ) -> Result<Option<AddressAccountMap>, StoreError>;

    /// Per-coin alerting flags; a default row is returned for unknown coins.
    async fn coin_flags(&self, symbol: &str) -> Result<CoinFlags, StoreError>;

    async fn update_coin_flags(&self, flags: &CoinFlags) -> Result<(), StoreError>;
}
