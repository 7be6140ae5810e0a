//! End-to-end bridge flow against the mock network and the SQLite store:
//! scan → deposit rows → validation → conversion, plus the re-scan and
//! unroutable-deposit paths.

use chrono::Utc;
use coinbridge::config::SnapshotBuilder;
use coinbridge::engine::{ConversionEngine, LogNotifier, Notifier};
use coinbridge::handlers::{HandlerRegistry, MockChain, MockHandlerFactory};
use coinbridge::orchestrator::{OrchestratorConfig, Task, TaskOrchestrator, TaskOutcome};
use coinbridge::store::{BridgeStore, SqliteStore};
use coinbridge::sync::{InProcessLocks, LockManager};
use coinbridge::types::{
    AddressAccountMap, Coin, CoinPair, DepositStatus, IncomingTx, TxSource,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

struct Bridge {
    chain: Arc<MockChain>,
    store: Arc<SqliteStore>,
    orchestrator: TaskOrchestrator,
}

/// Three coins:
/// - LTC: address-based, routed through the address map
/// - HIVE: account-based (our account "bridge"), routed by memo
/// - LTCP: account-based destination token, issuable
/// Pairs LTC→LTCP and HIVE→LTCP at rate 1, 1% exchange fee.
async fn bridge() -> Bridge {
    let chain = MockChain::new();
    chain.mark_account_based("HIVE");
    chain.mark_account_based("LTCP");

    let snapshot = Arc::new(
        SnapshotBuilder::new(1)
            .coin(Coin::new("LTC", "mock"))
            .coin(Coin::new("HIVE", "mock").with_our_account("bridge"))
            .coin(
                Coin::new("LTCP", "mock")
                    .with_our_account("bridge")
                    .issuable(),
            )
            .fee_percent(Decimal::ONE)
            .build(),
    );

    let registry = Arc::new(HandlerRegistry::new());
    registry.register(Arc::new(MockHandlerFactory::new(Arc::clone(&chain))));
    registry.reload(snapshot);

    let store = Arc::new(SqliteStore::connect_in_memory().await.unwrap());
    store
        .insert_pair(&CoinPair::new("LTC", "LTCP", Decimal::ONE))
        .await
        .unwrap();
    store
        .insert_pair(&CoinPair::new("HIVE", "LTCP", Decimal::ONE))
        .await
        .unwrap();
    store
        .insert_address_map(&AddressAccountMap::new("LTC", "Ldeposit1", "LTCP", "alice"))
        .await
        .unwrap();

    let engine = Arc::new(ConversionEngine::new(
        Arc::clone(&store) as Arc<dyn BridgeStore>,
        registry,
        Arc::new(LogNotifier) as Arc<dyn Notifier>,
    ));
    let orchestrator = TaskOrchestrator::new(
        engine,
        Arc::new(InProcessLocks::new()) as Arc<dyn LockManager>,
        OrchestratorConfig::default(),
    );

    Bridge {
        chain,
        store,
        orchestrator,
    }
}

fn address_tx(txid: &str, address: &str, amount: &str) -> IncomingTx {
    IncomingTx {
        txid: txid.into(),
        coin: "LTC".into(),
        vout: 0,
        tx_timestamp: Utc::now(),
        amount: Decimal::from_str(amount).unwrap(),
        source: TxSource::Address {
            address: address.into(),
        },
    }
}

fn memo_tx(txid: &str, memo: &str, amount: &str) -> IncomingTx {
    IncomingTx {
        txid: txid.into(),
        coin: "HIVE".into(),
        vout: 0,
        tx_timestamp: Utc::now(),
        amount: Decimal::from_str(amount).unwrap(),
        source: TxSource::Account {
            from_account: "alice".into(),
            to_account: "bridge".into(),
            memo: Some(memo.into()),
        },
    }
}

#[tokio::test]
async fn address_mapped_deposit_converts_end_to_end() {
    let bridge = bridge().await;
    bridge.chain.push_tx(address_tx("atx1", "Ldeposit1", "10"));

    let summary = bridge.orchestrator.run_cycle().await.unwrap();
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.invalid, 0);

    let deposit = bridge.store.deposit(1).await.unwrap().unwrap();
    assert_eq!(deposit.status, DepositStatus::Converted);
    assert_eq!(deposit.convert_to.as_deref(), Some("LTCP"));
    assert!(deposit.processed_at.is_some());

    let conversion = bridge.store.conversion_for_deposit(1).await.unwrap().unwrap();
    assert_eq!(conversion.to_coin, "LTCP");
    assert_eq!(conversion.to_address, "alice");
    assert_eq!(conversion.to_amount, Decimal::from_str("9.9").unwrap());
    assert_eq!(conversion.ex_fee, Decimal::from_str("0.1").unwrap());
    assert!(conversion.to_txid.is_some());

    let records = bridge.chain.sent();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].coin, "LTCP");
    assert!(records[0].issued, "empty LTCP wallet must fall back to issuing");
}

#[tokio::test]
async fn memo_routed_deposit_carries_onward_memo() {
    let bridge = bridge().await;
    bridge.chain.push_tx(memo_tx("mtx1", "ltcp bob thanks friend", "4"));

    bridge.orchestrator.run_cycle().await.unwrap();

    let conversion = bridge.store.conversion_for_deposit(1).await.unwrap().unwrap();
    assert_eq!(conversion.to_address, "bob");
    assert_eq!(conversion.to_memo.as_deref(), Some("thanks friend"));
    assert_eq!(conversion.to_amount, Decimal::from_str("3.96").unwrap());
    assert_eq!(conversion.ex_fee, Decimal::from_str("0.04").unwrap());
}

#[tokio::test]
async fn rescans_never_duplicate_deposits_or_sends() {
    let bridge = bridge().await;
    bridge.chain.push_tx(address_tx("atx1", "Ldeposit1", "10"));

    bridge.orchestrator.run_cycle().await.unwrap();
    bridge.orchestrator.run_cycle().await.unwrap();
    bridge.orchestrator.run_cycle().await.unwrap();

    assert!(bridge.store.deposit(1).await.unwrap().is_some());
    assert!(bridge.store.deposit(2).await.unwrap().is_none(), "one row only");
    assert_eq!(bridge.chain.send_count(), 1, "one outbound transfer only");
}

#[tokio::test]
async fn unroutable_deposits_become_invalid_not_errored() {
    let bridge = bridge().await;
    // No address map entry for this address, and no memo to parse
    bridge.chain.push_tx(address_tx("atx9", "Lunmapped", "2"));

    let summary = bridge.orchestrator.run_cycle().await.unwrap();
    assert_eq!(summary.invalid, 1);
    assert_eq!(summary.failed, 0);

    let deposit = bridge.store.deposit(1).await.unwrap().unwrap();
    assert_eq!(deposit.status, DepositStatus::Invalid);
    assert!(deposit.error_reason.is_some());
    assert_eq!(bridge.chain.send_count(), 0);
}

#[tokio::test]
async fn mixed_batch_settles_each_deposit_independently() {
    let bridge = bridge().await;
    bridge.chain.push_tx(address_tx("atx1", "Ldeposit1", "10"));
    bridge.chain.push_tx(address_tx("atx2", "Lunmapped", "5"));
    bridge.chain.push_tx(memo_tx("mtx1", "LTCP carol", "7"));
    bridge.chain.push_tx(memo_tx("mtx2", "nonsense", "1"));

    bridge.orchestrator.run_cycle().await.unwrap();

    let converted = bridge
        .store
        .deposits_by_status(DepositStatus::Converted, 10)
        .await
        .unwrap();
    let invalid = bridge
        .store
        .deposits_by_status(DepositStatus::Invalid, 10)
        .await
        .unwrap();
    assert_eq!(converted.len(), 2);
    assert_eq!(invalid.len(), 2);
    assert_eq!(bridge.chain.send_count(), 2);
}

#[tokio::test]
async fn operator_refund_returns_original_amount() {
    let bridge = bridge().await;
    bridge.chain.set_balance("HIVE", Decimal::from(100));
    bridge.chain.push_tx(memo_tx("mtx1", "nonsense", "6"));

    bridge.orchestrator.run_cycle().await.unwrap();
    let deposit = bridge.store.deposit(1).await.unwrap().unwrap();
    assert_eq!(deposit.status, DepositStatus::Invalid);

    // Operator decides to send it back
    let outcome = bridge
        .orchestrator
        .process(&Task::RefundDeposit {
            deposit_id: 1,
            reason: None,
            return_to: None,
        })
        .await;
    assert!(outcome.is_completed(), "got {outcome:?}");

    let deposit = bridge.store.deposit(1).await.unwrap().unwrap();
    assert_eq!(deposit.status, DepositStatus::Refunded);
    assert_eq!(deposit.refund_address.as_deref(), Some("alice"));
    assert_eq!(deposit.refund_amount, Decimal::from(6));
    assert_eq!(deposit.refund_coin.as_deref(), Some("HIVE"));

    // And a second refund attempt must be rejected
    let outcome = bridge
        .orchestrator
        .process(&Task::RefundDeposit {
            deposit_id: 1,
            reason: None,
            return_to: None,
        })
        .await;
    assert!(matches!(outcome, TaskOutcome::Failed(_)));
    assert_eq!(bridge.chain.send_count(), 1);
}
