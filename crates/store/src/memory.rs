use async_trait::async_trait;
use coinbridge_types::{
    AddressAccountMap, CoinFlags, CoinPair, Conversion, Deposit, DepositKey, DepositStatus,
};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::{BridgeStore, StoreError};

#[derive(Default)]
struct Inner {
    deposits: HashMap<i64, Deposit>,
    deposit_keys: HashMap<DepositKey, i64>,
    conversions: HashMap<i64, Conversion>,
    conversion_by_deposit: HashMap<i64, i64>,
    pairs: HashMap<(String, String), CoinPair>,
    address_maps: Vec<AddressAccountMap>,
    flags: HashMap<String, CoinFlags>,
    next_deposit_id: i64,
    next_conversion_id: i64,
}

/// In-memory store for tests and single-process development runs.
///
/// All mutations take the write lock for their full read-modify-write, so
/// each row update is atomic exactly like a database transaction would be.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_deposit_id: 1,
                next_conversion_id: 1,
                ..Inner::default()
            }),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BridgeStore for MemoryStore {
    async fn insert_deposit(&self, deposit: &Deposit) -> Result<i64, StoreError> {
        let mut inner = self.write();
        let key = deposit.key();
        if inner.deposit_keys.contains_key(&key) {
            return Err(StoreError::DuplicateDeposit {
                txid: key.txid,
                coin: key.coin,
                vout: key.vout,
            });
        }
        let id = inner.next_deposit_id;
        inner.next_deposit_id += 1;

        let mut row = deposit.clone();
        row.id = id;
        inner.deposit_keys.insert(key, id);
        inner.deposits.insert(id, row);
        Ok(id)
    }

    async fn deposit(&self, id: i64) -> Result<Option<Deposit>, StoreError> {
        Ok(self.read().deposits.get(&id).cloned())
    }

    async fn find_deposit(&self, key: &DepositKey) -> Result<Option<Deposit>, StoreError> {
        let inner = self.read();
        Ok(inner
            .deposit_keys
            .get(key)
            .and_then(|id| inner.deposits.get(id))
            .cloned())
    }

    async fn update_deposit(&self, deposit: &Deposit) -> Result<(), StoreError> {
        let mut inner = self.write();
        if !inner.deposits.contains_key(&deposit.id) {
            return Err(StoreError::NotFound(format!("deposit {}", deposit.id)));
        }
        inner.deposits.insert(deposit.id, deposit.clone());
        Ok(())
    }

    async fn deposits_by_status(
        &self,
        status: DepositStatus,
        limit: usize,
    ) -> Result<Vec<Deposit>, StoreError> {
        let inner = self.read();
        let mut rows: Vec<Deposit> = inner
            .deposits
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect();
        rows.sort_by_key(|d| d.id);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn count_mapped_to(&self, to_coin: &str) -> Result<usize, StoreError> {
        let to_coin = to_coin.to_uppercase();
        Ok(self
            .read()
            .deposits
            .values()
            .filter(|d| {
                d.status == DepositStatus::Mapped && d.convert_to.as_deref() == Some(to_coin.as_str())
            })
            .count())
    }

    async fn insert_conversion(&self, conversion: &Conversion) -> Result<i64, StoreError> {
        let mut inner = self.write();
        if inner.conversion_by_deposit.contains_key(&conversion.deposit_id) {
            return Err(StoreError::DuplicateConversion {
                deposit_id: conversion.deposit_id,
            });
        }
        let id = inner.next_conversion_id;
        inner.next_conversion_id += 1;

        let mut row = conversion.clone();
        row.id = id;
        inner.conversion_by_deposit.insert(conversion.deposit_id, id);
        inner.conversions.insert(id, row);
        Ok(id)
    }

    async fn conversion_for_deposit(
        &self,
        deposit_id: i64,
    ) -> Result<Option<Conversion>, StoreError> {
        let inner = self.read();
        Ok(inner
            .conversion_by_deposit
            .get(&deposit_id)
            .and_then(|id| inner.conversions.get(id))
            .cloned())
    }

    async fn insert_pair(&self, pair: &CoinPair) -> Result<(), StoreError> {
        let mut inner = self.write();
        let key = (pair.from_coin.clone(), pair.to_coin.clone());
        if inner.pairs.contains_key(&key) {
            return Err(StoreError::DuplicatePair {
                from_coin: pair.from_coin.clone(),
                to_coin: pair.to_coin.clone(),
            });
        }
        inner.pairs.insert(key, pair.clone());
        Ok(())
    }

    async fn pair(&self, from_coin: &str, to_coin: &str) -> Result<Option<CoinPair>, StoreError> {
        let key = (from_coin.to_uppercase(), to_coin.to_uppercase());
        Ok(self.read().pairs.get(&key).cloned())
    }

    async fn pairs_from(&self, from_coin: &str) -> Result<Vec<CoinPair>, StoreError> {
        let from_coin = from_coin.to_uppercase();
        let mut pairs: Vec<CoinPair> = self
            .read()
            .pairs
            .values()
            .filter(|p| p.from_coin == from_coin)
            .cloned()
            .collect();
        pairs.sort_by(|a, b| a.to_coin.cmp(&b.to_coin));
        Ok(pairs)
    }

    async fn insert_address_map(&self, map: &AddressAccountMap) -> Result<(), StoreError> {
        let mut inner = self.write();
        if inner.address_maps.iter().any(|m| m.key() == map.key()) {
            return Err(StoreError::DuplicateAddressMap {
                coin: map.deposit_coin.clone(),
                address: map.deposit_address.clone(),
            });
        }
        inner.address_maps.push(map.clone());
        Ok(())
    }

    async fn find_address_map(
        &self,
        coin: &str,
        address: &str,
        memo: Option<&str>,
    ) -> Result<Option<AddressAccountMap>, StoreError> {
        let coin = coin.to_uppercase();
        let memo = memo.filter(|m| !m.trim().is_empty());
        Ok(self
            .read()
            .address_maps
            .iter()
            .find(|m| {
                m.deposit_coin == coin
                    && m.deposit_address == address
                    && match memo {
                        Some(memo) => m.deposit_memo.as_deref() == Some(memo),
                        None => true,
                    }
            })
            .cloned())
    }

    async fn coin_flags(&self, symbol: &str) -> Result<CoinFlags, StoreError> {
        let symbol = symbol.to_uppercase();
        Ok(self
            .read()
            .flags
            .get(&symbol)
            .cloned()
            .unwrap_or_else(|| CoinFlags::new(symbol)))
    }

    async fn update_coin_flags(&self, flags: &CoinFlags) -> Result<(), StoreError> {
        self.write().flags.insert(flags.symbol.clone(), flags.clone());
        Ok(())
    }
}
