use serde::{Deserialize, Serialize};

/// Durable routing entry for memo-less deposits.
///
/// Address-based networks (Bitcoin-like) carry no memo, so each deposit
/// address must be mapped to a destination ahead of time. The triple
/// (deposit_coin, deposit_address, deposit_memo) is unique — otherwise the
/// destination would be ambiguous. The memo field exists so that
/// account-based deposits can also be pre-routed when required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressAccountMap {
    pub deposit_coin: String,
    pub deposit_address: String,
    pub deposit_memo: Option<String>,

    pub destination_coin: String,
    pub destination_address: String,
    pub destination_memo: Option<String>,
}

impl AddressAccountMap {
    pub fn new(
        deposit_coin: impl Into<String>,
        deposit_address: impl Into<String>,
        destination_coin: impl Into<String>,
        destination_address: impl Into<String>,
    ) -> Self {
        Self {
            deposit_coin: deposit_coin.into().to_uppercase(),
            deposit_address: deposit_address.into(),
            deposit_memo: None,
            destination_coin: destination_coin.into().to_uppercase(),
            destination_address: destination_address.into(),
            destination_memo: None,
        }
    }

    pub fn with_deposit_memo(mut self, memo: impl Into<String>) -> Self {
        self.deposit_memo = Some(memo.into());
        self
    }

    pub fn with_destination_memo(mut self, memo: impl Into<String>) -> Self {
        self.destination_memo = Some(memo.into());
        self
    }

    /// Uniqueness key for the store.
    pub fn key(&self) -> (String, String, Option<String>) {
        (
            self.deposit_coin.clone(),
            self.deposit_address.clone(),
            self.deposit_memo.clone(),
        )
    }
}

impl std::fmt::Display for AddressAccountMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} -> {} {}",
            self.deposit_coin, self.deposit_address, self.destination_coin, self.destination_address
        )
    }
}
