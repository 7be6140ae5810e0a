use coinbridge_store::BridgeStore;
use coinbridge_types::{CoinPair, Deposit, DepositStatus};
use tracing::debug;

use crate::{ConversionEngine, ConvertError};

/// Where a deposit should go: resolved destination address/account, the
/// conversion pair, and an optional onward memo.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub address: String,
    pub pair: CoinPair,
    pub dest_memo: Option<String>,
}

impl ConversionEngine {
    /// Identify the destination for a deposit.
    ///
    /// Memo-carrying deposits route themselves: the first whitespace token
    /// is the destination symbol (case-insensitive), the second the
    /// address/account, anything further becomes the onward memo.
    /// Address-carrying deposits are routed through the address map.
    /// A deposit with neither cannot be routed and is invalid.
    pub async fn resolve_destination(&self, deposit: &Deposit) -> Result<Resolution, ConvertError> {
        // A conversion row appearing here means a previous attempt already
        // sent coins; this must never proceed to a second send.
        if self.store().conversion_for_deposit(deposit.id).await?.is_some() {
            return Err(ConvertError::Fault(format!(
                "a conversion already exists for deposit {}; an admin should verify no coins \
                 were double-sent before clearing it",
                deposit.id
            )));
        }

        if self.store().pairs_from(&deposit.coin).await?.is_empty() {
            return Err(ConvertError::Invalid(format!(
                "no coin pairs with from_coin = {}",
                deposit.coin
            )));
        }

        let memo = deposit.memo.as_deref().map(str::trim).filter(|m| !m.is_empty());
        let address = deposit
            .address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty());

        if let (Some(memo), None) = (memo, address) {
            debug!(deposit_id = deposit.id, "deposit has a memo, parsing destination");
            return self.resolve_memo(deposit, memo).await;
        }

        if let Some(address) = address {
            debug!(deposit_id = deposit.id, %address, "looking up address map");
            return self.resolve_address(deposit, address, memo).await;
        }

        Err(ConvertError::Invalid(
            "no deposit address nor memo - unable to route this deposit anywhere".into(),
        ))
    }

    async fn resolve_memo(&self, deposit: &Deposit, memo: &str) -> Result<Resolution, ConvertError> {
        let mut tokens = memo.split_whitespace();
        let (symbol, address) = match (tokens.next(), tokens.next()) {
            (Some(symbol), Some(address)) => (symbol.to_uppercase(), address.to_string()),
            _ => {
                return Err(ConvertError::Invalid(
                    "memo is not valid - splitting by whitespace resulted in <2 items".into(),
                ))
            }
        };

        let rest: Vec<&str> = tokens.collect();
        let dest_memo = if rest.is_empty() {
            None
        } else {
            Some(rest.join(" "))
        };

        let pair = self
            .store()
            .pair(&deposit.coin, &symbol)
            .await?
            .ok_or_else(|| {
                ConvertError::Invalid(format!(
                    "deposit is for non-existent coin pair {} -> {}",
                    deposit.coin, symbol
                ))
            })?;

        Ok(Resolution {
            address,
            pair,
            dest_memo,
        })
    }

    async fn resolve_address(
        &self,
        deposit: &Deposit,
        address: &str,
        memo: Option<&str>,
    ) -> Result<Resolution, ConvertError> {
        let map = self
            .store()
            .find_address_map(&deposit.coin, address, memo)
            .await?
            .ok_or_else(|| {
                ConvertError::Invalid(format!(
                    "deposit address {address} has no known coin destination mapped to it"
                ))
            })?;

        let pair = self
            .store()
            .pair(&deposit.coin, &map.destination_coin)
            .await?
            .ok_or_else(|| {
                ConvertError::Invalid(format!(
                    "deposit is for non-existent coin pair {} -> {}",
                    deposit.coin, map.destination_coin
                ))
            })?;

        Ok(Resolution {
            address: map.destination_address,
            pair,
            dest_memo: map.destination_memo,
        })
    }

    /// Validate a `new` deposit, resolve its destination, and advance it to
    /// `mapped` with the convert_* fields stamped.
    pub async fn map_deposit(&self, deposit_id: i64) -> Result<Deposit, ConvertError> {
        let mut deposit = self.load_deposit(deposit_id).await?;
        if deposit.status != DepositStatus::New {
            return Err(ConvertError::Fault(format!(
                "deposit {} is not in 'new' state during validation (found '{}')",
                deposit.id, deposit.status
            )));
        }

        let resolution = self.resolve_destination(&deposit).await?;
        debug!(
            deposit_id = deposit.id,
            pair = %resolution.pair,
            address = %resolution.address,
            "deposit mapped to destination"
        );

        deposit.mark_mapped(
            &resolution.pair.to_coin,
            &resolution.address,
            resolution.dest_memo,
        )?;
        self.store().update_deposit(&deposit).await?;
        Ok(deposit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::tests::{fixture, mapped_deposit};
    use chrono::Utc;
    use coinbridge_store::BridgeStore;
    use coinbridge_types::AddressAccountMap;
    use rust_decimal::Decimal;

    fn memo_deposit(memo: &str) -> Deposit {
        Deposit::new("txm", "LTC", 0, Decimal::TEN, Utc::now()).with_transfer(
            "alice",
            "bridge",
            Some(memo.to_string()),
        )
    }

    #[tokio::test]
    async fn memo_routing_with_onward_memo() {
        let fx = fixture().await;
        let resolution = fx
            .engine
            .resolve_destination(&memo_deposit("LTCP abc123 hello world"))
            .await
            .unwrap();
        assert_eq!(resolution.address, "abc123");
        assert_eq!(resolution.pair.to_coin, "LTCP");
        assert_eq!(resolution.dest_memo.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn memo_symbol_is_case_insensitive() {
        let fx = fixture().await;
        let resolution = fx
            .engine
            .resolve_destination(&memo_deposit("ltcp alice"))
            .await
            .unwrap();
        assert_eq!(resolution.pair.to_coin, "LTCP");
        assert!(resolution.dest_memo.is_none());
    }

    #[tokio::test]
    async fn short_memo_is_invalid_not_a_fault() {
        let fx = fixture().await;
        let err = fx
            .engine
            .resolve_destination(&memo_deposit("justonetoken"))
            .await
            .unwrap_err();
        assert!(err.is_invalid(), "got {err:?}");
    }

    #[tokio::test]
    async fn unknown_pair_is_invalid() {
        let fx = fixture().await;
        let err = fx
            .engine
            .resolve_destination(&memo_deposit("DOGE alice"))
            .await
            .unwrap_err();
        assert!(err.is_invalid());
    }

    #[tokio::test]
    async fn address_map_routing() {
        let fx = fixture().await;
        fx.store
            .insert_address_map(
                &AddressAccountMap::new("LTC", "Lsource", "LTCP", "alice")
                    .with_destination_memo("mapped memo"),
            )
            .await
            .unwrap();

        let deposit = Deposit::new("txa", "LTC", 0, Decimal::TEN, Utc::now()).with_address("Lsource");
        let resolution = fx.engine.resolve_destination(&deposit).await.unwrap();
        assert_eq!(resolution.address, "alice");
        assert_eq!(resolution.pair.to_coin, "LTCP");
        assert_eq!(resolution.dest_memo.as_deref(), Some("mapped memo"));
    }

    #[tokio::test]
    async fn unmapped_address_is_invalid() {
        let fx = fixture().await;
        let deposit = Deposit::new("txa", "LTC", 0, Decimal::TEN, Utc::now()).with_address("Lnowhere");
        let err = fx.engine.resolve_destination(&deposit).await.unwrap_err();
        assert!(err.is_invalid());
    }

    #[tokio::test]
    async fn no_memo_no_address_is_invalid() {
        let fx = fixture().await;
        let deposit = Deposit::new("txn", "LTC", 0, Decimal::TEN, Utc::now());
        let err = fx.engine.resolve_destination(&deposit).await.unwrap_err();
        assert!(err.is_invalid());
    }

    #[tokio::test]
    async fn coin_without_outgoing_pairs_is_invalid() {
        let fx = fixture().await;
        let deposit = Deposit::new("txp", "BTCP", 0, Decimal::TEN, Utc::now())
            .with_transfer("alice", "bridge", Some("LTCP alice".to_string()));
        let err = fx.engine.resolve_destination(&deposit).await.unwrap_err();
        assert!(err.is_invalid());
    }

    #[tokio::test]
    async fn existing_conversion_is_a_fault_not_invalid() {
        let fx = fixture().await;
        let id = mapped_deposit(&fx, Decimal::TEN).await;
        fx.engine.convert_deposit(id).await.unwrap();

        let deposit = fx.store.deposit(id).await.unwrap().unwrap();
        let err = fx.engine.resolve_destination(&deposit).await.unwrap_err();
        assert!(matches!(err, ConvertError::Fault(_)));
    }

    #[tokio::test]
    async fn map_deposit_advances_to_mapped() {
        let fx = fixture().await;
        let id = fx
            .store
            .insert_deposit(&memo_deposit("LTCP alice send me"))
            .await
            .unwrap();

        let mapped = fx.engine.map_deposit(id).await.unwrap();
        assert_eq!(mapped.status, DepositStatus::Mapped);
        assert_eq!(mapped.convert_to.as_deref(), Some("LTCP"));
        assert_eq!(mapped.convert_dest_address.as_deref(), Some("alice"));
        assert_eq!(mapped.convert_dest_memo.as_deref(), Some("send me"));

        // Re-validating a mapped deposit is a fault
        let err = fx.engine.map_deposit(id).await.unwrap_err();
        assert!(matches!(err, ConvertError::Fault(_)));
    }
}
