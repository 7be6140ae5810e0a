use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The durable record of a completed outbound transfer fulfilling a deposit.
///
/// Exactly one conversion may ever exist per deposit, and it is written only
/// after the destination network's Mover has confirmed the send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    /// Store-assigned row id; 0 until inserted
    pub id: i64,

    /// The deposit this conversion fulfils (one-to-one)
    pub deposit_id: i64,

    pub from_coin: String,

    /// Sender-side address/account reported by the Mover, if known
    pub from_address: Option<String>,

    pub to_coin: String,
    pub to_address: String,
    pub to_memo: Option<String>,

    /// Amount of `to_coin` actually sent
    pub to_amount: Decimal,

    /// Destination network transaction id; some networks cannot report one
    pub to_txid: Option<String>,

    /// Network fee taken by the destination chain
    pub tx_fee: Decimal,

    /// Exchange fee retained by the operator, in `to_coin` units
    pub ex_fee: Decimal,

    pub created_at: DateTime<Utc>,
}

impl Conversion {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        deposit_id: i64,
        from_coin: impl Into<String>,
        to_coin: impl Into<String>,
        to_address: impl Into<String>,
        to_amount: Decimal,
    ) -> Self {
        Self {
            id: 0,
            deposit_id,
            from_coin: from_coin.into().to_uppercase(),
            from_address: None,
            to_coin: to_coin.into().to_uppercase(),
            to_address: to_address.into(),
            to_memo: None,
            to_amount,
            to_txid: None,
            tx_fee: Decimal::ZERO,
            ex_fee: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    pub fn with_from_address(mut self, from_address: Option<String>) -> Self {
        self.from_address = from_address;
        self
    }

    pub fn with_memo(mut self, memo: Option<String>) -> Self {
        self.to_memo = memo;
        self
    }

    pub fn with_txid(mut self, txid: Option<String>) -> Self {
        self.to_txid = txid;
        self
    }

    pub fn with_fees(mut self, tx_fee: Decimal, ex_fee: Decimal) -> Self {
        self.tx_fee = tx_fee;
        self.ex_fee = ex_fee;
        self
    }
}

impl std::fmt::Display for Conversion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Conversion ID {} - From: {} to {} (Destination: {})",
            self.id, self.from_coin, self.to_coin, self.to_address
        )
    }
}
