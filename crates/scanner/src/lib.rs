//! Batched, memory-bounded transaction scanning.
//!
//! The scanner drives a [`Loader`] through paginated retrieval and yields
//! canonical incoming transfers one at a time as a lazy stream. At most one
//! batch is buffered, so peak memory is bounded by the configured batch
//! size regardless of how deep the upstream history is.

use coinbridge_config::ScanSettings;
use coinbridge_handlers::{HandlerError, Loader};
use coinbridge_types::{Coin, IncomingTx};
use futures::stream::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ScanError {
    /// The coin's upstream API is hard-down. Callers skip the coin for
    /// this run instead of spending retry budget on it.
    #[error("api for coin {coin} is not responding: {reason}")]
    DeadApi { coin: String, reason: String },

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

type TxStream = Pin<Box<dyn Stream<Item = Result<IncomingTx, ScanError>> + Send>>;

pub struct BatchScanner {
    loader: Arc<dyn Loader>,
    settings: ScanSettings,
}

impl BatchScanner {
    pub fn new(loader: Arc<dyn Loader>, settings: ScanSettings) -> Self {
        Self { loader, settings }
    }

    /// Lazy stream of canonical transfers for one coin.
    ///
    /// Stops when a batch fetches fewer raw records than the batch size, or
    /// when the per-coin cap is reached. Each call restarts from offset 0.
    pub fn scan_coin(&self, coin: Coin) -> TxStream {
        scan_coin_stream(Arc::clone(&self.loader), coin, self.settings)
    }

    /// Lazy stream over every coin the loader serves, in the loader's
    /// post-`load` order. A dead upstream for one coin logs and skips that
    /// coin; other loader errors for a coin end that coin's scan and are
    /// surfaced to the caller.
    pub fn scan_all(&self) -> TxStream {
        struct State {
            loader: Arc<dyn Loader>,
            settings: ScanSettings,
            coins: VecDeque<Coin>,
            current: Option<TxStream>,
            loaded: bool,
        }

        let state = State {
            loader: Arc::clone(&self.loader),
            settings: self.settings,
            coins: VecDeque::new(),
            current: None,
            loaded: false,
        };

        Box::pin(futures::stream::unfold(state, |mut s| async move {
            loop {
                if !s.loaded {
                    s.loaded = true;
                    if let Err(e) = s.loader.load().await {
                        return Some((Err(ScanError::Handler(e)), s));
                    }
                    s.coins = s.loader.coins().into();
                }

                if let Some(current) = &mut s.current {
                    match current.next().await {
                        Some(Err(ScanError::DeadApi { coin, reason })) => {
                            warn!(%coin, %reason, "skipping coin: api not responding");
                            s.current = None;
                        }
                        Some(item) => return Some((item, s)),
                        None => s.current = None,
                    }
                    continue;
                }

                match s.coins.pop_front() {
                    Some(coin) => {
                        debug!(coin = %coin.symbol, "scanning coin");
                        s.current = Some(scan_coin_stream(
                            Arc::clone(&s.loader),
                            coin,
                            s.settings,
                        ));
                    }
                    None => return None,
                }
            }
        }))
    }
}

fn scan_coin_stream(loader: Arc<dyn Loader>, coin: Coin, settings: ScanSettings) -> TxStream {
    struct State {
        loader: Arc<dyn Loader>,
        coin: Coin,
        batch: VecDeque<IncomingTx>,
        offset: usize,
        fetched_total: usize,
        finished: bool,
        settings: ScanSettings,
    }

    let state = State {
        loader,
        coin,
        batch: VecDeque::new(),
        offset: 0,
        fetched_total: 0,
        finished: false,
        settings,
    };

    Box::pin(futures::stream::try_unfold(state, |mut s| async move {
        loop {
            if let Some(tx) = s.batch.pop_front() {
                return Ok(Some((tx, s)));
            }
            if s.finished {
                return Ok(None);
            }

            let limit = s.settings.batch_size;
            let batch = s
                .loader
                .load_batch(&s.coin, limit, s.offset)
                .await
                .map_err(|e| match e {
                    HandlerError::DeadApi(reason) => ScanError::DeadApi {
                        coin: s.coin.symbol.clone(),
                        reason,
                    },
                    other => ScanError::Handler(other),
                })?;

            s.offset += limit;
            s.fetched_total += batch.fetched;
            // Pagination terminates on the RAW fetch count: filtering may
            // discard records without meaning the upstream is exhausted
            if batch.fetched < limit || s.fetched_total >= s.settings.tx_limit {
                s.finished = true;
            }
            s.batch = batch.records.into();
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coinbridge_handlers::{MockChain, MockLoader};
    use coinbridge_types::TxSource;
    use rust_decimal::Decimal;

    fn address_tx(coin: &str, txid: &str) -> IncomingTx {
        IncomingTx {
            txid: txid.into(),
            coin: coin.into(),
            vout: 0,
            tx_timestamp: Utc::now(),
            amount: Decimal::ONE,
            source: TxSource::Address {
                address: format!("addr-{txid}"),
            },
        }
    }

    fn settings(batch_size: usize, tx_limit: usize) -> ScanSettings {
        ScanSettings { batch_size, tx_limit }
    }

    #[tokio::test]
    async fn scans_across_batches_until_exhausted() {
        let chain = MockChain::new();
        for i in 0..25 {
            chain.push_tx(address_tx("LTC", &format!("tx{i}")));
        }

        let coin = Coin::new("LTC", "mock");
        let loader = Arc::new(MockLoader::new(chain, vec![coin.clone()]));
        let scanner = BatchScanner::new(loader, settings(10, 1000));

        let txs: Vec<_> = scanner
            .scan_coin(coin)
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(txs.len(), 25);
        assert_eq!(txs[0].txid, "tx0");
        assert_eq!(txs[24].txid, "tx24");
    }

    #[tokio::test]
    async fn per_coin_cap_bounds_the_scan() {
        let chain = MockChain::new();
        for i in 0..50 {
            chain.push_tx(address_tx("LTC", &format!("tx{i}")));
        }

        let coin = Coin::new("LTC", "mock");
        let loader = Arc::new(MockLoader::new(chain, vec![coin.clone()]));
        let scanner = BatchScanner::new(loader, settings(10, 30));

        let txs: Vec<_> = scanner.scan_coin(coin).collect::<Vec<_>>().await;
        assert_eq!(txs.len(), 30);
    }

    #[tokio::test]
    async fn dead_api_surfaces_as_distinct_error() {
        let chain = MockChain::new();
        chain.set_dead_api(true);

        let coin = Coin::new("LTC", "mock");
        let loader = Arc::new(MockLoader::new(chain, vec![coin.clone()]));
        let scanner = BatchScanner::new(loader, settings(10, 1000));

        let mut stream = scanner.scan_coin(coin);
        match stream.next().await {
            Some(Err(ScanError::DeadApi { coin, .. })) => assert_eq!(coin, "LTC"),
            other => panic!("expected DeadApi, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scan_all_skips_dead_coins_and_continues() {
        let chain = MockChain::new();
        chain.push_tx(address_tx("BTC", "b1"));
        chain.push_tx(address_tx("LTC", "l1"));
        chain.push_tx(address_tx("LTC", "l2"));
        chain.set_coin_dead("BTC");

        let loader = Arc::new(MockLoader::new(
            chain,
            vec![Coin::new("BTC", "mock"), Coin::new("LTC", "mock")],
        ));
        let scanner = BatchScanner::new(loader, settings(10, 1000));

        let txs: Vec<_> = scanner
            .scan_all()
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;
        let ids: Vec<_> = txs.iter().map(|t| t.txid.as_str()).collect();
        assert_eq!(ids, vec!["l1", "l2"]);
    }

    #[tokio::test]
    async fn rescanning_restarts_from_the_top() {
        let chain = MockChain::new();
        chain.push_tx(address_tx("LTC", "tx0"));

        let coin = Coin::new("LTC", "mock");
        let loader = Arc::new(MockLoader::new(chain, vec![coin.clone()]));
        let scanner = BatchScanner::new(loader, settings(10, 1000));

        for _ in 0..2 {
            let txs: Vec<_> = scanner.scan_coin(coin.clone()).collect::<Vec<_>>().await;
            assert_eq!(txs.len(), 1);
        }
    }
}
