use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Deposit, DepositKey};

/// Where an incoming transfer came from and how it identifies itself.
///
/// Address-based networks attach a receiving address; account-based
/// networks attach sender/receiver account names and an optional memo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxSource {
    Address {
        address: String,
    },
    Account {
        from_account: String,
        to_account: String,
        memo: Option<String>,
    },
}

/// A canonical incoming transfer as produced by a Loader, already filtered
/// of self-sends, wrong-contract records and transfers not addressed to the
/// operator. This is the only shape the scanner hands to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingTx {
    pub txid: String,

    /// Routing symbol of the coin the transfer arrived as
    pub coin: String,

    /// Output index within the transaction; 0 for single-output networks
    pub vout: u32,

    pub tx_timestamp: DateTime<Utc>,
    pub amount: Decimal,
    pub source: TxSource,
}

impl IncomingTx {
    pub fn key(&self) -> DepositKey {
        DepositKey {
            txid: self.txid.clone(),
            coin: self.coin.clone(),
            vout: self.vout,
        }
    }

    pub fn into_deposit(self) -> Deposit {
        let deposit = Deposit::new(self.txid, self.coin, self.vout, self.amount, self.tx_timestamp);
        match self.source {
            TxSource::Address { address } => deposit.with_address(address),
            TxSource::Account {
                from_account,
                to_account,
                memo,
            } => deposit.with_transfer(from_account, to_account, memo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DepositStatus;

    #[test]
    fn address_tx_becomes_new_deposit() {
        let tx = IncomingTx {
            txid: "abc".into(),
            coin: "LTC".into(),
            vout: 2,
            tx_timestamp: Utc::now(),
            amount: Decimal::ONE,
            source: TxSource::Address { address: "Lfoo".into() },
        };
        let d = tx.into_deposit();
        assert_eq!(d.status, DepositStatus::New);
        assert_eq!(d.address.as_deref(), Some("Lfoo"));
        assert_eq!(d.vout, 2);
        assert!(d.memo.is_none());
    }

    #[test]
    fn account_tx_carries_memo() {
        let tx = IncomingTx {
            txid: "abc".into(),
            coin: "HIVE".into(),
            vout: 0,
            tx_timestamp: Utc::now(),
            amount: Decimal::ONE,
            source: TxSource::Account {
                from_account: "alice".into(),
                to_account: "bridge".into(),
                memo: Some("LTC Lfoo".into()),
            },
        };
        let d = tx.into_deposit();
        assert_eq!(d.from_account.as_deref(), Some("alice"));
        assert_eq!(d.to_account.as_deref(), Some("bridge"));
        assert_eq!(d.memo.as_deref(), Some("LTC Lfoo"));
        assert!(d.address.is_none());
    }
}
