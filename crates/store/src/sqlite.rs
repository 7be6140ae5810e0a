//! SQLite-backed store.
//!
//! Amounts are stored as canonical decimal strings and timestamps as
//! RFC 3339 text; the schema's UNIQUE constraints are the durable form of
//! the store contract's uniqueness guarantees. The address-map memo column
//! stores the empty string for "no memo" because SQLite treats NULLs as
//! distinct inside unique constraints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coinbridge_types::{
    AddressAccountMap, CoinFlags, CoinPair, Conversion, Deposit, DepositKey, DepositStatus,
};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

use crate::{BridgeStore, StoreError};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS deposits (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        txid TEXT NOT NULL,
        coin TEXT NOT NULL,
        vout INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        error_reason TEXT,
        tx_timestamp TEXT NOT NULL,
        address TEXT,
        from_account TEXT,
        to_account TEXT,
        memo TEXT,
        amount TEXT NOT NULL,
        convert_to TEXT,
        convert_dest_address TEXT,
        convert_dest_memo TEXT,
        refund_address TEXT,
        refund_memo TEXT,
        refund_coin TEXT,
        refund_amount TEXT NOT NULL DEFAULT '0',
        refund_txid TEXT,
        refunded_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        last_convert_attempt TEXT,
        processed_at TEXT,
        UNIQUE (txid, coin, vout)
    )",
    "CREATE INDEX IF NOT EXISTS idx_deposits_status ON deposits (status)",
    "CREATE TABLE IF NOT EXISTS conversions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        deposit_id INTEGER NOT NULL UNIQUE REFERENCES deposits (id),
        from_coin TEXT NOT NULL,
        from_address TEXT,
        to_coin TEXT NOT NULL,
        to_address TEXT NOT NULL,
        to_memo TEXT,
        to_amount TEXT NOT NULL,
        to_txid TEXT,
        tx_fee TEXT NOT NULL DEFAULT '0',
        ex_fee TEXT NOT NULL DEFAULT '0',
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS coin_pairs (
        from_coin TEXT NOT NULL,
        to_coin TEXT NOT NULL,
        exchange_rate TEXT NOT NULL,
        PRIMARY KEY (from_coin, to_coin)
    )",
    "CREATE TABLE IF NOT EXISTS address_maps (
        deposit_coin TEXT NOT NULL,
        deposit_address TEXT NOT NULL,
        deposit_memo TEXT NOT NULL DEFAULT '',
        destination_coin TEXT NOT NULL,
        destination_address TEXT NOT NULL,
        destination_memo TEXT,
        PRIMARY KEY (deposit_coin, deposit_address, deposit_memo)
    )",
    "CREATE TABLE IF NOT EXISTS coin_flags (
        symbol TEXT PRIMARY KEY,
        funds_low INTEGER NOT NULL DEFAULT 0,
        last_notified TEXT
    )",
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to a SQLite database and ensure the schema exists.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database, for tests and throwaway runs.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        Ok(())
    }
}

fn map_insert_err(e: sqlx::Error, duplicate: StoreError) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => duplicate,
        _ => StoreError::Database(e.to_string()),
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn parse_decimal(value: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_opt_time(value: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.as_deref().map(parse_time).transpose()
}

fn opt_time(value: &Option<DateTime<Utc>>) -> Option<String> {
    value.map(|t| t.to_rfc3339())
}

fn deposit_from_row(row: &SqliteRow) -> Result<Deposit, StoreError> {
    let status_text: String = row.try_get("status").map_err(db_err)?;
    let status = DepositStatus::parse(&status_text)
        .ok_or_else(|| StoreError::Serialization(format!("unknown status '{status_text}'")))?;

    let amount: String = row.try_get("amount").map_err(db_err)?;
    let refund_amount: String = row.try_get("refund_amount").map_err(db_err)?;
    let tx_timestamp: String = row.try_get("tx_timestamp").map_err(db_err)?;
    let created_at: String = row.try_get("created_at").map_err(db_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(db_err)?;

    Ok(Deposit {
        id: row.try_get("id").map_err(db_err)?,
        txid: row.try_get("txid").map_err(db_err)?,
        coin: row.try_get("coin").map_err(db_err)?,
        vout: row.try_get::<i64, _>("vout").map_err(db_err)? as u32,
        status,
        error_reason: row.try_get("error_reason").map_err(db_err)?,
        tx_timestamp: parse_time(&tx_timestamp)?,
        address: row.try_get("address").map_err(db_err)?,
        from_account: row.try_get("from_account").map_err(db_err)?,
        to_account: row.try_get("to_account").map_err(db_err)?,
        memo: row.try_get("memo").map_err(db_err)?,
        amount: parse_decimal(&amount)?,
        convert_to: row.try_get("convert_to").map_err(db_err)?,
        convert_dest_address: row.try_get("convert_dest_address").map_err(db_err)?,
        convert_dest_memo: row.try_get("convert_dest_memo").map_err(db_err)?,
        refund_address: row.try_get("refund_address").map_err(db_err)?,
        refund_memo: row.try_get("refund_memo").map_err(db_err)?,
        refund_coin: row.try_get("refund_coin").map_err(db_err)?,
        refund_amount: parse_decimal(&refund_amount)?,
        refund_txid: row.try_get("refund_txid").map_err(db_err)?,
        refunded_at: parse_opt_time(row.try_get("refunded_at").map_err(db_err)?)?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
        last_convert_attempt: parse_opt_time(row.try_get("last_convert_attempt").map_err(db_err)?)?,
        processed_at: parse_opt_time(row.try_get("processed_at").map_err(db_err)?)?,
    })
}

fn conversion_from_row(row: &SqliteRow) -> Result<Conversion, StoreError> {
    let to_amount: String = row.try_get("to_amount").map_err(db_err)?;
    let tx_fee: String = row.try_get("tx_fee").map_err(db_err)?;
    let ex_fee: String = row.try_get("ex_fee").map_err(db_err)?;
    let created_at: String = row.try_get("created_at").map_err(db_err)?;

    Ok(Conversion {
        id: row.try_get("id").map_err(db_err)?,
        deposit_id: row.try_get("deposit_id").map_err(db_err)?,
        from_coin: row.try_get("from_coin").map_err(db_err)?,
        from_address: row.try_get("from_address").map_err(db_err)?,
        to_coin: row.try_get("to_coin").map_err(db_err)?,
        to_address: row.try_get("to_address").map_err(db_err)?,
        to_memo: row.try_get("to_memo").map_err(db_err)?,
        to_amount: parse_decimal(&to_amount)?,
        to_txid: row.try_get("to_txid").map_err(db_err)?,
        tx_fee: parse_decimal(&tx_fee)?,
        ex_fee: parse_decimal(&ex_fee)?,
        created_at: parse_time(&created_at)?,
    })
}

#[async_trait]
impl BridgeStore for SqliteStore {
    async fn insert_deposit(&self, deposit: &Deposit) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO deposits (
                txid, coin, vout, status, error_reason, tx_timestamp,
                address, from_account, to_account, memo, amount,
                convert_to, convert_dest_address, convert_dest_memo,
                refund_address, refund_memo, refund_coin, refund_amount,
                refund_txid, refunded_at, created_at, updated_at,
                last_convert_attempt, processed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&deposit.txid)
        .bind(&deposit.coin)
        .bind(deposit.vout as i64)
        .bind(deposit.status.as_str())
        .bind(&deposit.error_reason)
        .bind(deposit.tx_timestamp.to_rfc3339())
        .bind(&deposit.address)
        .bind(&deposit.from_account)
        .bind(&deposit.to_account)
        .bind(&deposit.memo)
        .bind(deposit.amount.to_string())
        .bind(&deposit.convert_to)
        .bind(&deposit.convert_dest_address)
        .bind(&deposit.convert_dest_memo)
        .bind(&deposit.refund_address)
        .bind(&deposit.refund_memo)
        .bind(&deposit.refund_coin)
        .bind(deposit.refund_amount.to_string())
        .bind(&deposit.refund_txid)
        .bind(opt_time(&deposit.refunded_at))
        .bind(deposit.created_at.to_rfc3339())
        .bind(deposit.updated_at.to_rfc3339())
        .bind(opt_time(&deposit.last_convert_attempt))
        .bind(opt_time(&deposit.processed_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_insert_err(
                e,
                StoreError::DuplicateDeposit {
                    txid: deposit.txid.clone(),
                    coin: deposit.coin.clone(),
                    vout: deposit.vout,
                },
            )
        })?;

        Ok(result.last_insert_rowid())
    }

    async fn deposit(&self, id: i64) -> Result<Option<Deposit>, StoreError> {
        let row = sqlx::query("SELECT * FROM deposits WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(deposit_from_row).transpose()
    }

    async fn find_deposit(&self, key: &DepositKey) -> Result<Option<Deposit>, StoreError> {
        let row = sqlx::query("SELECT * FROM deposits WHERE txid = ? AND coin = ? AND vout = ?")
            .bind(&key.txid)
            .bind(&key.coin)
            .bind(key.vout as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(deposit_from_row).transpose()
    }

    async fn update_deposit(&self, deposit: &Deposit) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE deposits SET
                status = ?, error_reason = ?,
                convert_to = ?, convert_dest_address = ?, convert_dest_memo = ?,
                refund_address = ?, refund_memo = ?, refund_coin = ?,
                refund_amount = ?, refund_txid = ?, refunded_at = ?,
                updated_at = ?, last_convert_attempt = ?, processed_at = ?
            WHERE id = ?",
        )
        .bind(deposit.status.as_str())
        .bind(&deposit.error_reason)
        .bind(&deposit.convert_to)
        .bind(&deposit.convert_dest_address)
        .bind(&deposit.convert_dest_memo)
        .bind(&deposit.refund_address)
        .bind(&deposit.refund_memo)
        .bind(&deposit.refund_coin)
        .bind(deposit.refund_amount.to_string())
        .bind(&deposit.refund_txid)
        .bind(opt_time(&deposit.refunded_at))
        .bind(deposit.updated_at.to_rfc3339())
        .bind(opt_time(&deposit.last_convert_attempt))
        .bind(opt_time(&deposit.processed_at))
        .bind(deposit.id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("deposit {}", deposit.id)));
        }
        Ok(())
    }

    async fn deposits_by_status(
        &self,
        status: DepositStatus,
        limit: usize,
    ) -> Result<Vec<Deposit>, StoreError> {
        let rows = sqlx::query("SELECT * FROM deposits WHERE status = ? ORDER BY id ASC LIMIT ?")
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(deposit_from_row).collect()
    }

    async fn count_mapped_to(&self, to_coin: &str) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM deposits WHERE status = 'mapped' AND convert_to = ?",
        )
        .bind(to_coin.to_uppercase())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(count as usize)
    }

    async fn insert_conversion(&self, conversion: &Conversion) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO conversions (
                deposit_id, from_coin, from_address, to_coin, to_address,
                to_memo, to_amount, to_txid, tx_fee, ex_fee, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(conversion.deposit_id)
        .bind(&conversion.from_coin)
        .bind(&conversion.from_address)
        .bind(&conversion.to_coin)
        .bind(&conversion.to_address)
        .bind(&conversion.to_memo)
        .bind(conversion.to_amount.to_string())
        .bind(&conversion.to_txid)
        .bind(conversion.tx_fee.to_string())
        .bind(conversion.ex_fee.to_string())
        .bind(conversion.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_insert_err(
                e,
                StoreError::DuplicateConversion {
                    deposit_id: conversion.deposit_id,
                },
            )
        })?;

        Ok(result.last_insert_rowid())
    }

    async fn conversion_for_deposit(
        &self,
        deposit_id: i64,
    ) -> Result<Option<Conversion>, StoreError> {
        let row = sqlx::query("SELECT * FROM conversions WHERE deposit_id = ?")
            .bind(deposit_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(conversion_from_row).transpose()
    }

    async fn insert_pair(&self, pair: &CoinPair) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO coin_pairs (from_coin, to_coin, exchange_rate) VALUES (?, ?, ?)")
            .bind(&pair.from_coin)
            .bind(&pair.to_coin)
            .bind(pair.exchange_rate.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                map_insert_err(
                    e,
                    StoreError::DuplicatePair {
                        from_coin: pair.from_coin.clone(),
                        to_coin: pair.to_coin.clone(),
                    },
                )
            })?;
        Ok(())
    }

    async fn pair(&self, from_coin: &str, to_coin: &str) -> Result<Option<CoinPair>, StoreError> {
        let row = sqlx::query("SELECT * FROM coin_pairs WHERE from_coin = ? AND to_coin = ?")
            .bind(from_coin.to_uppercase())
            .bind(to_coin.to_uppercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|row| {
            let rate: String = row.try_get("exchange_rate").map_err(db_err)?;
            Ok(CoinPair {
                from_coin: row.try_get("from_coin").map_err(db_err)?,
                to_coin: row.try_get("to_coin").map_err(db_err)?,
                exchange_rate: parse_decimal(&rate)?,
            })
        })
        .transpose()
    }

    async fn pairs_from(&self, from_coin: &str) -> Result<Vec<CoinPair>, StoreError> {
        let rows = sqlx::query("SELECT * FROM coin_pairs WHERE from_coin = ? ORDER BY to_coin ASC")
            .bind(from_coin.to_uppercase())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                let rate: String = row.try_get("exchange_rate").map_err(db_err)?;
                Ok(CoinPair {
                    from_coin: row.try_get("from_coin").map_err(db_err)?,
                    to_coin: row.try_get("to_coin").map_err(db_err)?,
                    exchange_rate: parse_decimal(&rate)?,
                })
            })
            .collect()
    }

    async fn insert_address_map(&self, map: &AddressAccountMap) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO address_maps (
                deposit_coin, deposit_address, deposit_memo,
                destination_coin, destination_address, destination_memo
            ) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&map.deposit_coin)
        .bind(&map.deposit_address)
        .bind(map.deposit_memo.clone().unwrap_or_default())
        .bind(&map.destination_coin)
        .bind(&map.destination_address)
        .bind(&map.destination_memo)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_insert_err(
                e,
                StoreError::DuplicateAddressMap {
                    coin: map.deposit_coin.clone(),
                    address: map.deposit_address.clone(),
                },
            )
        })?;
        Ok(())
    }

    async fn find_address_map(
        &self,
        coin: &str,
        address: &str,
        memo: Option<&str>,
    ) -> Result<Option<AddressAccountMap>, StoreError> {
        let memo = memo.map(str::trim).filter(|m| !m.is_empty());
        let query = match memo {
            Some(_) => {
                "SELECT * FROM address_maps
                 WHERE deposit_coin = ? AND deposit_address = ? AND deposit_memo = ?
                 ORDER BY rowid ASC LIMIT 1"
            }
            None => {
                "SELECT * FROM address_maps
                 WHERE deposit_coin = ? AND deposit_address = ?
                 ORDER BY rowid ASC LIMIT 1"
            }
        };

        let mut q = sqlx::query(query)
            .bind(coin.to_uppercase())
            .bind(address.to_string());
        if let Some(memo) = memo {
            q = q.bind(memo.to_string());
        }

        let row = q.fetch_optional(&self.pool).await.map_err(db_err)?;
        row.map(|row| {
            let memo: String = row.try_get("deposit_memo").map_err(db_err)?;
            Ok(AddressAccountMap {
                deposit_coin: row.try_get("deposit_coin").map_err(db_err)?,
                deposit_address: row.try_get("deposit_address").map_err(db_err)?,
                deposit_memo: if memo.is_empty() { None } else { Some(memo) },
                destination_coin: row.try_get("destination_coin").map_err(db_err)?,
                destination_address: row.try_get("destination_address").map_err(db_err)?,
                destination_memo: row.try_get("destination_memo").map_err(db_err)?,
            })
        })
        .transpose()
    }

    async fn coin_flags(&self, symbol: &str) -> Result<CoinFlags, StoreError> {
        let symbol = symbol.to_uppercase();
        let row = sqlx::query("SELECT * FROM coin_flags WHERE symbol = ?")
            .bind(&symbol)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => Ok(CoinFlags {
                symbol: row.try_get("symbol").map_err(db_err)?,
                funds_low: row.try_get::<i64, _>("funds_low").map_err(db_err)? != 0,
                last_notified: parse_opt_time(row.try_get("last_notified").map_err(db_err)?)?,
            }),
            None => Ok(CoinFlags::new(symbol)),
        }
    }

    async fn update_coin_flags(&self, flags: &CoinFlags) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO coin_flags (symbol, funds_low, last_notified) VALUES (?, ?, ?)
             ON CONFLICT (symbol) DO UPDATE SET funds_low = excluded.funds_low,
                                                last_notified = excluded.last_notified",
        )
        .bind(&flags.symbol)
        .bind(flags.funds_low as i64)
        .bind(opt_time(&flags.last_notified))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
