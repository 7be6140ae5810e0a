use coinbridge_config::ConfigSnapshot;
use coinbridge_handlers::{HandlerError, HandlerRegistry, Mover, SentTx};
use coinbridge_store::BridgeStore;
use coinbridge_types::{CoinPair, Conversion, Deposit, DepositStatus, RefundDetails};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    amount_converted, ConvertError, ConvertOutcome, DeferReason, LowBalanceNotice, Notifier,
};

/// Executes validated deposits: fee math, health checks, the outbound
/// transfer, and the durable records of what happened.
///
/// The engine only classifies; it acquires no locks and mutates no state
/// machine except through the typed transition methods. The orchestrator
/// owns locking and the fault → status mapping.
pub struct ConversionEngine {
    store: Arc<dyn BridgeStore>,
    registry: Arc<HandlerRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl ConversionEngine {
    pub fn new(
        store: Arc<dyn BridgeStore>,
        registry: Arc<HandlerRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<dyn BridgeStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub(crate) fn snapshot(&self) -> Result<Arc<ConfigSnapshot>, ConvertError> {
        self.registry
            .snapshot()
            .ok_or_else(|| ConvertError::Authority("handler registry has no configuration".into()))
    }

    pub(crate) async fn load_deposit(&self, deposit_id: i64) -> Result<Deposit, ConvertError> {
        self.store
            .deposit(deposit_id)
            .await?
            .ok_or_else(|| ConvertError::Fault(format!("deposit {deposit_id} does not exist")))
    }

    /// Convert a deposit in `mapped` state to its resolved destination.
    pub async fn convert_deposit(&self, deposit_id: i64) -> Result<ConvertOutcome, ConvertError> {
        let mut deposit = self.load_deposit(deposit_id).await?;
        if deposit.status != DepositStatus::Mapped {
            return Err(ConvertError::Fault(format!(
                "deposit {} is not in 'mapped' state during conversion (found '{}')",
                deposit.id, deposit.status
            )));
        }

        let convert_to = deposit.convert_to.clone().ok_or_else(|| {
            ConvertError::Fault("deposit has no resolved destination coin, cannot convert".into())
        })?;
        let address = deposit.convert_dest_address.clone().ok_or_else(|| {
            ConvertError::Fault("deposit has no resolved destination address, cannot convert".into())
        })?;

        let pair = self
            .store
            .pair(&deposit.coin, &convert_to)
            .await?
            .ok_or_else(|| {
                ConvertError::Invalid(format!(
                    "deposit is for non-existent coin pair {} -> {}",
                    deposit.coin, convert_to
                ))
            })?;

        debug!(
            deposit_id = deposit.id,
            pair = %pair,
            "converting deposit"
        );
        let dest_memo = deposit.convert_dest_memo.clone();
        self.convert(&mut deposit, &pair, &address, dest_memo).await
    }

    /// Send the converted amount and record the outcome.
    pub async fn convert(
        &self,
        deposit: &mut Deposit,
        pair: &CoinPair,
        address: &str,
        dest_memo: Option<String>,
    ) -> Result<ConvertOutcome, ConvertError> {
        let snapshot = self.snapshot()?;
        let mover = self.registry.get_mover(&pair.to_coin)?;

        let dest_memo = dest_memo
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default_memo(deposit));

        let (send_amount, ex_fee) =
            amount_converted(deposit.amount, pair.exchange_rate, snapshot.fee_percent);

        if !mover.health_check().await {
            warn!(
                coin = %pair.to_coin,
                "destination network reported unhealthy, will try again later"
            );
            deposit.touch_attempt();
            self.store.update_deposit(deposit).await?;
            return Ok(ConvertOutcome::Deferred(DeferReason::Unhealthy {
                coin: pair.to_coin.clone(),
            }));
        }

        info!(
            deposit_id = deposit.id,
            amount = %send_amount,
            coin = %pair.to_coin,
            %address,
            "sending converted amount"
        );

        let result = if mover.coin().can_issue {
            mover
                .send_or_issue(send_amount, address, Some(dest_memo.as_str()))
                .await
        } else {
            mover.send(send_amount, address, Some(dest_memo.as_str())).await
        };

        match result {
            Ok(sent) => {
                deposit.mark_converted()?;
                self.store.update_deposit(deposit).await?;

                let mut conversion =
                    Conversion::new(deposit.id, &pair.from_coin, &pair.to_coin, address, sent.amount)
                        .with_from_address(sent.from.clone())
                        .with_memo(Some(dest_memo))
                        .with_txid(sent.txid.clone())
                        .with_fees(sent.fee, ex_fee);
                conversion.id = self.store.insert_conversion(&conversion).await?;

                info!(
                    deposit_id = deposit.id,
                    conversion_id = conversion.id,
                    txid = ?conversion.to_txid,
                    "conversion recorded"
                );
                Ok(ConvertOutcome::Converted(conversion))
            }
            Err(HandlerError::AccountNotFound(detail)) => Err(ConvertError::Invalid(format!(
                "destination address \"{address}\" appears to be invalid: {detail}"
            ))),
            Err(HandlerError::NotEnoughBalance { needed, available }) => {
                error!(
                    coin = %pair.to_coin,
                    %needed,
                    %available,
                    "not enough balance to convert, will try again later"
                );
                deposit.touch_attempt();
                self.store.update_deposit(deposit).await?;
                self.notify_low_balance(&snapshot, pair, needed, available, mover.as_ref())
                    .await;
                Ok(ConvertOutcome::Deferred(DeferReason::LowBalance {
                    coin: pair.to_coin.clone(),
                    needed,
                    available,
                }))
            }
            Err(e @ HandlerError::AuthorityMissing { .. }) => {
                Err(ConvertError::Authority(e.to_string()))
            }
            Err(other) => Err(ConvertError::Fault(other.to_string())),
        }
    }

    /// Return a deposit to its original sender.
    ///
    /// Destination priority: explicit `return_to`, then the deposit's
    /// source address, then its from-account. Settled deposits are
    /// rejected.
    pub async fn refund_sender(
        &self,
        deposit_id: i64,
        reason: Option<String>,
        return_to: Option<String>,
    ) -> Result<(Deposit, SentTx), ConvertError> {
        let mut deposit = self.load_deposit(deposit_id).await?;
        if deposit.status == DepositStatus::Refunded {
            return Err(ConvertError::Fault(format!(
                "deposit {} is already refunded",
                deposit.id
            )));
        }
        if deposit.status == DepositStatus::Converted {
            return Err(ConvertError::Fault(format!(
                "deposit {} is already successfully converted",
                deposit.id
            )));
        }

        let reason = reason
            .or_else(|| deposit.error_reason.clone())
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| {
                format!(
                    "Returned to sender due to unknown error processing deposit amount {} with TXID {}",
                    deposit.amount, deposit.txid
                )
            });

        let dest = return_to
            .filter(|d| !d.trim().is_empty())
            .or_else(|| deposit.address.clone().filter(|d| !d.trim().is_empty()))
            .or_else(|| deposit.from_account.clone().filter(|d| !d.trim().is_empty()))
            .ok_or_else(|| {
                ConvertError::Fault("refund could not find any non-empty return address/account".into())
            })?;

        let mover = self.registry.get_mover(&deposit.coin)?;
        info!(
            deposit_id = deposit.id,
            amount = %deposit.amount,
            coin = %deposit.coin,
            %dest,
            %reason,
            "refunding deposit to sender"
        );

        let sent = mover
            .send_or_issue(deposit.amount, &dest, Some(reason.as_str()))
            .await
            .map_err(|e| match e {
                e @ HandlerError::AuthorityMissing { .. } => ConvertError::Authority(e.to_string()),
                other => ConvertError::Fault(format!("refund failed: {other}")),
            })?;

        deposit.mark_refunded(RefundDetails {
            address: dest,
            memo: Some(reason),
            coin: deposit.coin.clone(),
            amount: sent.amount,
            txid: sent.txid.clone(),
        })?;
        self.store.update_deposit(&deposit).await?;

        info!(deposit_id = deposit.id, "refund recorded");
        Ok((deposit, sent))
    }

    /// Rate-limited low-balance alert. Nothing here may fail conversion
    /// processing, so every error is logged and swallowed.
    async fn notify_low_balance(
        &self,
        snapshot: &ConfigSnapshot,
        pair: &CoinPair,
        needed: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
        mover: &dyn Mover,
    ) {
        let Some(coin) = snapshot.coin(&pair.to_coin) else {
            return;
        };

        let mut flags = match self.store.coin_flags(&pair.to_coin).await {
            Ok(flags) => flags,
            Err(e) => {
                warn!(coin = %pair.to_coin, error = %e, "could not load coin flags for alerting");
                return;
            }
        };

        let now = Utc::now();
        if !flags.should_notify_low(coin, snapshot.low_funds_renotify(), now) {
            debug!(coin = %pair.to_coin, "suppressing repeat low-balance alert");
            return;
        }

        let deposits_waiting = self
            .store
            .count_mapped_to(&pair.to_coin)
            .await
            .unwrap_or_default();
        let deposit_target = mover.deposit_target().await.ok();

        self.notifier
            .low_balance(LowBalanceNotice {
                coin: pair.to_coin.clone(),
                needed,
                available,
                deposits_waiting,
                deposit_target,
            })
            .await;

        flags.mark_notified(now);
        if let Err(e) = self.store.update_coin_flags(&flags).await {
            warn!(coin = %pair.to_coin, error = %e, "could not persist alert damping flags");
        }
    }
}

/// Human-readable provenance memo used when the sender supplied none.
fn default_memo(deposit: &Deposit) -> String {
    let mut memo = "Token Conversion".to_string();
    if let Some(address) = deposit.address.as_deref().filter(|a| !a.is_empty()) {
        memo.push_str(&format!(" via {} deposit address {}", deposit.coin, address));
    }
    if let Some(from) = deposit.from_account.as_deref().filter(|a| !a.is_empty()) {
        memo.push_str(&format!(" from {} account {}", deposit.coin, from));
    }
    memo
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use coinbridge_config::SnapshotBuilder;
    use coinbridge_handlers::{MockChain, MockHandlerFactory};
    use coinbridge_store::MemoryStore;
    use coinbridge_types::Coin;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    pub(crate) struct Fixture {
        pub chain: Arc<MockChain>,
        pub store: Arc<MemoryStore>,
        pub notifier: Arc<crate::RecordingNotifier>,
        pub engine: ConversionEngine,
    }

    /// LTC (address-based) convertible into LTCP (account-based, issuable),
    /// rate 1, 1% exchange fee.
    pub(crate) async fn fixture() -> Fixture {
        let chain = MockChain::new();
        chain.mark_account_based("LTCP");

        let snapshot = Arc::new(
            SnapshotBuilder::new(1)
                .coin(Coin::new("LTC", "mock").with_low_funds_alerts())
                .coin(
                    Coin::new("LTCP", "mock")
                        .with_our_account("bridge")
                        .issuable()
                        .with_low_funds_alerts(),
                )
                .coin(Coin::new("BTCP", "mock").with_our_account("bridge"))
                .fee_percent(Decimal::ONE)
                .build(),
        );

        let registry = Arc::new(HandlerRegistry::new());
        registry.register(Arc::new(MockHandlerFactory::new(Arc::clone(&chain))));
        registry.reload(snapshot);

        let store = Arc::new(MemoryStore::new());
        store
            .insert_pair(&CoinPair::new("LTC", "LTCP", Decimal::ONE))
            .await
            .unwrap();
        store
            .insert_pair(&CoinPair::new("LTC", "BTCP", Decimal::from_str("0.5").unwrap()))
            .await
            .unwrap();

        let notifier = Arc::new(crate::RecordingNotifier::new());
        let engine = ConversionEngine::new(
            Arc::clone(&store) as Arc<dyn BridgeStore>,
            registry,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
        );

        Fixture {
            chain,
            store,
            notifier,
            engine,
        }
    }

    pub(crate) async fn mapped_deposit(fx: &Fixture, amount: Decimal) -> i64 {
        let deposit = Deposit::new("tx1", "LTC", 0, amount, Utc::now())
            .with_transfer("alice", "bridge", Some("LTCP alice".to_string()));
        let id = fx.store.insert_deposit(&deposit).await.unwrap();

        let mut row = fx.store.deposit(id).await.unwrap().unwrap();
        row.mark_mapped("LTCP", "alice", None).unwrap();
        fx.store.update_deposit(&row).await.unwrap();
        id
    }

    #[tokio::test]
    async fn convert_example_end_to_end() {
        let fx = fixture().await;
        // LTCP is issuable, so an empty hot wallet falls back to issuing
        let id = mapped_deposit(&fx, Decimal::TEN).await;

        let outcome = fx.engine.convert_deposit(id).await.unwrap();
        let conversion = match outcome {
            ConvertOutcome::Converted(c) => c,
            other => panic!("expected conversion, got {other:?}"),
        };

        assert_eq!(conversion.to_amount, Decimal::from_str("9.9").unwrap());
        assert_eq!(conversion.ex_fee, Decimal::from_str("0.1").unwrap());
        assert_eq!(conversion.to_coin, "LTCP");
        assert_eq!(conversion.to_address, "alice");
        assert!(conversion.to_txid.is_some());
        // Default provenance memo mentions the sender account
        assert!(conversion.to_memo.as_deref().unwrap().contains("from LTC account alice"));

        let deposit = fx.store.deposit(id).await.unwrap().unwrap();
        assert_eq!(deposit.status, DepositStatus::Converted);
        assert!(deposit.processed_at.is_some());
    }

    #[tokio::test]
    async fn unhealthy_network_defers_without_error() {
        let fx = fixture().await;
        let id = mapped_deposit(&fx, Decimal::TEN).await;
        fx.chain.set_healthy(false);

        let outcome = fx.engine.convert_deposit(id).await.unwrap();
        assert!(matches!(
            outcome,
            ConvertOutcome::Deferred(DeferReason::Unhealthy { .. })
        ));

        let deposit = fx.store.deposit(id).await.unwrap().unwrap();
        assert_eq!(deposit.status, DepositStatus::Mapped);
        assert!(deposit.last_convert_attempt.is_some());
        assert_eq!(fx.chain.send_count(), 0);
    }

    #[tokio::test]
    async fn low_balance_defers_without_alert_when_not_opted_in() {
        let fx = fixture().await;

        // Route into the non-issuable BTCP so the empty wallet cannot be
        // papered over by issuing. BTCP has alerting disabled.
        let deposit = Deposit::new("tx2", "LTC", 0, Decimal::TEN, Utc::now()).with_address("Lfoo");
        let id = fx.store.insert_deposit(&deposit).await.unwrap();
        let mut row = fx.store.deposit(id).await.unwrap().unwrap();
        row.mark_mapped("BTCP", "bob", None).unwrap();
        fx.store.update_deposit(&row).await.unwrap();

        let outcome = fx.engine.convert_deposit(id).await.unwrap();
        assert!(matches!(
            outcome,
            ConvertOutcome::Deferred(DeferReason::LowBalance { .. })
        ));

        let reloaded = fx.store.deposit(id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, DepositStatus::Mapped);
        assert!(reloaded.last_convert_attempt.is_some());
        assert!(fx.notifier.low_balance_notices().is_empty());
    }

    #[tokio::test]
    async fn low_balance_alert_is_rate_limited() {
        let fx = fixture().await;

        // Make LTCP non-issuable for this test by draining sends through a
        // coin that alerts: use LTCP with issuing disabled via a fresh pair
        // into LTC (alerting enabled, address-based, not issuable).
        fx.store
            .insert_pair(&CoinPair::new("LTCP", "LTC", Decimal::ONE))
            .await
            .unwrap();

        let deposit = Deposit::new("tx3", "LTCP", 0, Decimal::TEN, Utc::now())
            .with_transfer("alice", "bridge", Some("LTC Lfoo".to_string()));
        let id = fx.store.insert_deposit(&deposit).await.unwrap();
        let mut row = fx.store.deposit(id).await.unwrap().unwrap();
        row.mark_mapped("LTC", "Lfoo", None).unwrap();
        fx.store.update_deposit(&row).await.unwrap();

        for _ in 0..2 {
            let outcome = fx.engine.convert_deposit(id).await.unwrap();
            assert!(matches!(outcome, ConvertOutcome::Deferred(_)));
        }

        // First attempt alerts, second is damped by the funds_low flag
        let notices = fx.notifier.low_balance_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].coin, "LTC");
        assert_eq!(notices[0].deposits_waiting, 1);
        assert!(fx.store.coin_flags("LTC").await.unwrap().funds_low);
    }

    #[tokio::test]
    async fn rejected_destination_is_invalid() {
        let fx = fixture().await;
        let id = mapped_deposit(&fx, Decimal::TEN).await;
        fx.chain.invalidate_address("alice");

        let err = fx.engine.convert_deposit(id).await.unwrap_err();
        assert!(err.is_invalid(), "got {err:?}");
    }

    #[tokio::test]
    async fn convert_requires_mapped_state() {
        let fx = fixture().await;
        let deposit = Deposit::new("tx9", "LTC", 0, Decimal::TEN, Utc::now()).with_address("Lfoo");
        let id = fx.store.insert_deposit(&deposit).await.unwrap();

        let err = fx.engine.convert_deposit(id).await.unwrap_err();
        assert!(matches!(err, ConvertError::Fault(_)));
    }

    #[tokio::test]
    async fn refund_prefers_explicit_return_address() {
        let fx = fixture().await;
        fx.chain.set_balance("LTC", Decimal::from(100));

        let deposit = Deposit::new("tx4", "LTC", 0, Decimal::TEN, Utc::now())
            .with_address("Lsender")
            .with_transfer("alice", "bridge", None);
        let id = fx.store.insert_deposit(&deposit).await.unwrap();

        let (refunded, sent) = fx
            .engine
            .refund_sender(id, Some("wrong memo".into()), Some("Lother".into()))
            .await
            .unwrap();

        assert_eq!(refunded.status, DepositStatus::Refunded);
        assert_eq!(refunded.refund_address.as_deref(), Some("Lother"));
        assert_eq!(refunded.refund_coin.as_deref(), Some("LTC"));
        assert_eq!(refunded.refund_amount, Decimal::TEN);
        assert_eq!(sent.amount, Decimal::TEN);

        let records = fx.chain.sent();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, "Lother");
        assert_eq!(records[0].memo.as_deref(), Some("wrong memo"));
    }

    #[tokio::test]
    async fn refund_falls_back_to_sender_address_then_account() {
        let fx = fixture().await;
        fx.chain.set_balance("LTC", Decimal::from(100));

        let deposit = Deposit::new("tx5", "LTC", 0, Decimal::ONE, Utc::now())
            .with_transfer("alice", "bridge", None);
        let id = fx.store.insert_deposit(&deposit).await.unwrap();

        let (refunded, _) = fx.engine.refund_sender(id, None, None).await.unwrap();
        assert_eq!(refunded.refund_address.as_deref(), Some("alice"));
        // Default refund memo explains the provenance
        assert!(refunded.refund_memo.as_deref().unwrap().contains("tx5"));
    }

    #[tokio::test]
    async fn settled_deposits_cannot_be_refunded() {
        let fx = fixture().await;
        let id = mapped_deposit(&fx, Decimal::TEN).await;
        fx.engine.convert_deposit(id).await.unwrap();

        let err = fx.engine.refund_sender(id, None, None).await.unwrap_err();
        assert!(matches!(err, ConvertError::Fault(_)));
        assert_eq!(fx.chain.send_count(), 1, "no refund send may happen");
    }
}
