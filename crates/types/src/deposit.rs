use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a deposit.
///
/// Transitions are monotonic: `new → mapped → conv`, with the error exits
/// `inv` (sender/mapping fault) and `err` (system fault), and a terminal
/// `refund`. A deposit in `conv` or `refund` can never be mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    /// Awaiting validation and destination resolution
    New,
    /// Destination resolved, awaiting conversion
    Mapped,
    /// Successfully converted (terminal)
    #[serde(rename = "conv")]
    Converted,
    /// Sender/mapping fault — awaiting a manual refund decision (terminal)
    #[serde(rename = "inv")]
    Invalid,
    /// System fault — needs investigation, may be reset to `new`
    #[serde(rename = "err")]
    Errored,
    /// Funds were returned to the sender (terminal)
    #[serde(rename = "refund")]
    Refunded,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::New => "new",
            DepositStatus::Mapped => "mapped",
            DepositStatus::Converted => "conv",
            DepositStatus::Invalid => "inv",
            DepositStatus::Errored => "err",
            DepositStatus::Refunded => "refund",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(DepositStatus::New),
            "mapped" => Some(DepositStatus::Mapped),
            "conv" => Some(DepositStatus::Converted),
            "inv" => Some(DepositStatus::Invalid),
            "err" => Some(DepositStatus::Errored),
            "refund" => Some(DepositStatus::Refunded),
            _ => None,
        }
    }

    /// States that must never be mutated by a later convert/refund attempt.
    pub fn is_settled(&self) -> bool {
        matches!(self, DepositStatus::Converted | DepositStatus::Refunded)
    }
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("deposit {id} cannot move from '{from}' to '{to}'")]
    IllegalTransition {
        id: i64,
        from: DepositStatus,
        to: DepositStatus,
    },
}

/// The uniqueness key of a deposit: re-scanning a network must never create
/// two rows with the same (txid, coin, vout).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepositKey {
    pub txid: String,
    pub coin: String,
    pub vout: u32,
}

/// Details of a completed refund, stamped onto the deposit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundDetails {
    pub address: String,
    pub memo: Option<String>,
    pub coin: String,
    pub amount: Decimal,
    pub txid: Option<String>,
}

/// One canonical incoming transfer awaiting or having undergone conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    /// Store-assigned row id; 0 until inserted
    pub id: i64,

    /// Transaction id on the source network
    pub txid: String,

    /// Source coin symbol, uppercase
    pub coin: String,

    /// Output index for multi-output transactions; must be stable across
    /// repeated scans of the same chain transaction
    pub vout: u32,

    pub status: DepositStatus,
    pub error_reason: Option<String>,

    /// When the transfer happened on the source network
    pub tx_timestamp: DateTime<Utc>,

    /// Address-based networks: the address the coins arrived on
    pub address: Option<String>,

    /// Account-based networks: sender, receiver and memo
    pub from_account: Option<String>,
    pub to_account: Option<String>,
    pub memo: Option<String>,

    pub amount: Decimal,

    /// Resolved destination, set when the deposit reaches `mapped`
    pub convert_to: Option<String>,
    pub convert_dest_address: Option<String>,
    pub convert_dest_memo: Option<String>,

    /// Refund details, set when the deposit reaches `refund`
    pub refund_address: Option<String>,
    pub refund_memo: Option<String>,
    pub refund_coin: Option<String>,
    pub refund_amount: Decimal,
    pub refund_txid: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Last time a conversion was attempted (stamped on deferrals)
    pub last_convert_attempt: Option<DateTime<Utc>>,

    /// When the deposit was successfully converted
    pub processed_at: Option<DateTime<Utc>>,
}

impl Deposit {
    pub fn new(
        txid: impl Into<String>,
        coin: impl Into<String>,
        vout: u32,
        amount: Decimal,
        tx_timestamp: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            txid: txid.into(),
            coin: coin.into().to_uppercase(),
            vout,
            status: DepositStatus::New,
            error_reason: None,
            tx_timestamp,
            address: None,
            from_account: None,
            to_account: None,
            memo: None,
            amount,
            convert_to: None,
            convert_dest_address: None,
            convert_dest_memo: None,
            refund_address: None,
            refund_memo: None,
            refund_coin: None,
            refund_amount: Decimal::ZERO,
            refund_txid: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
            last_convert_attempt: None,
            processed_at: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_transfer(
        mut self,
        from_account: impl Into<String>,
        to_account: impl Into<String>,
        memo: Option<String>,
    ) -> Self {
        self.from_account = Some(from_account.into());
        self.to_account = Some(to_account.into());
        self.memo = memo;
        self
    }

    pub fn key(&self) -> DepositKey {
        DepositKey {
            txid: self.txid.clone(),
            coin: self.coin.clone(),
            vout: self.vout,
        }
    }

    fn transition(&self, to: DepositStatus, allowed_from: &[DepositStatus]) -> Result<(), StateError> {
        if allowed_from.contains(&self.status) {
            return Ok(());
        }
        Err(StateError::IllegalTransition {
            id: self.id,
            from: self.status,
            to,
        })
    }

    /// `new → mapped`: destination resolution succeeded.
    pub fn mark_mapped(
        &mut self,
        convert_to: impl Into<String>,
        dest_address: impl Into<String>,
        dest_memo: Option<String>,
    ) -> Result<(), StateError> {
        self.transition(DepositStatus::Mapped, &[DepositStatus::New])?;
        self.status = DepositStatus::Mapped;
        self.convert_to = Some(convert_to.into().to_uppercase());
        self.convert_dest_address = Some(dest_address.into());
        self.convert_dest_memo = dest_memo;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `mapped → conv`: the outbound transfer was confirmed sent.
    pub fn mark_converted(&mut self) -> Result<(), StateError> {
        self.transition(DepositStatus::Converted, &[DepositStatus::Mapped])?;
        let now = Utc::now();
        self.status = DepositStatus::Converted;
        self.processed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `new`/`mapped` → `inv`: classified sender or mapping fault.
    pub fn mark_invalid(&mut self, reason: impl Into<String>) -> Result<(), StateError> {
        self.transition(DepositStatus::Invalid, &[DepositStatus::New, DepositStatus::Mapped])?;
        self.status = DepositStatus::Invalid;
        self.error_reason = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Any non-settled state → `err`: unclassified system fault.
    pub fn mark_errored(&mut self, reason: impl Into<String>) -> Result<(), StateError> {
        if self.status.is_settled() {
            return Err(StateError::IllegalTransition {
                id: self.id,
                from: self.status,
                to: DepositStatus::Errored,
            });
        }
        self.status = DepositStatus::Errored;
        self.error_reason = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Any non-settled state → `refund`: funds were returned to the sender.
    pub fn mark_refunded(&mut self, details: RefundDetails) -> Result<(), StateError> {
        if self.status.is_settled() {
            return Err(StateError::IllegalTransition {
                id: self.id,
                from: self.status,
                to: DepositStatus::Refunded,
            });
        }
        let now = Utc::now();
        self.status = DepositStatus::Refunded;
        self.refund_address = Some(details.address);
        self.refund_memo = details.memo;
        self.refund_coin = Some(details.coin);
        self.refund_amount = details.amount;
        self.refund_txid = details.txid;
        self.refunded_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Manual operator reset of an errored deposit back to `new`.
    pub fn reset_to_new(&mut self) -> Result<(), StateError> {
        self.transition(DepositStatus::New, &[DepositStatus::Errored])?;
        self.status = DepositStatus::New;
        self.error_reason = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Stamp a deferred conversion attempt (unhealthy network, low balance).
    pub fn touch_attempt(&mut self) {
        let now = Utc::now();
        self.last_convert_attempt = Some(now);
        self.updated_at = now;
    }
}

impl std::fmt::Display for Deposit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ID: {}, Coin: {}, TXID: {}", self.id, self.coin, self.txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit() -> Deposit {
        Deposit::new("tx1", "ltc", 0, Decimal::TEN, Utc::now())
    }

    #[test]
    fn happy_path_is_monotonic() {
        let mut d = deposit();
        assert_eq!(d.status, DepositStatus::New);

        d.mark_mapped("LTCP", "someaccount", None).unwrap();
        assert_eq!(d.status, DepositStatus::Mapped);
        assert_eq!(d.convert_to.as_deref(), Some("LTCP"));

        d.mark_converted().unwrap();
        assert_eq!(d.status, DepositStatus::Converted);
        assert!(d.processed_at.is_some());
    }

    #[test]
    fn mapped_cannot_be_reentered() {
        let mut d = deposit();
        d.mark_mapped("LTCP", "a", None).unwrap();
        let err = d.mark_mapped("LTCP", "b", None).unwrap_err();
        assert_eq!(
            err,
            StateError::IllegalTransition {
                id: 0,
                from: DepositStatus::Mapped,
                to: DepositStatus::Mapped,
            }
        );
    }

    #[test]
    fn settled_deposits_reject_all_mutations() {
        let mut d = deposit();
        d.mark_mapped("LTCP", "a", None).unwrap();
        d.mark_converted().unwrap();

        assert!(d.mark_errored("boom").is_err());
        assert!(d.mark_invalid("bad memo").is_err());
        assert!(d
            .mark_refunded(RefundDetails {
                address: "a".into(),
                memo: None,
                coin: "LTC".into(),
                amount: Decimal::TEN,
                txid: None,
            })
            .is_err());
        assert_eq!(d.status, DepositStatus::Converted);
    }

    #[test]
    fn invalid_only_from_new_or_mapped() {
        let mut d = deposit();
        d.mark_errored("boom").unwrap();
        assert!(d.mark_invalid("nope").is_err());
    }

    #[test]
    fn errored_resets_to_new() {
        let mut d = deposit();
        d.mark_errored("boom").unwrap();
        d.reset_to_new().unwrap();
        assert_eq!(d.status, DepositStatus::New);
        assert!(d.error_reason.is_none());
    }

    #[test]
    fn refund_allowed_from_errored() {
        let mut d = deposit();
        d.mark_errored("boom").unwrap();
        d.mark_refunded(RefundDetails {
            address: "sender".into(),
            memo: Some("returned".into()),
            coin: "LTC".into(),
            amount: Decimal::TEN,
            txid: Some("rtx".into()),
        })
        .unwrap();
        assert_eq!(d.status, DepositStatus::Refunded);
        assert!(d.refunded_at.is_some());

        // And never again
        assert!(d.reset_to_new().is_err());
    }

    #[test]
    fn status_round_trips_storage_labels() {
        for status in [
            DepositStatus::New,
            DepositStatus::Mapped,
            DepositStatus::Converted,
            DepositStatus::Invalid,
            DepositStatus::Errored,
            DepositStatus::Refunded,
        ] {
            assert_eq!(DepositStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DepositStatus::parse("bogus"), None);
    }
}
