use chrono::Duration;
use coinbridge_types::Coin;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::CoinSettings;

/// Scanner tuning shared by all loaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// Records fetched per `load_batch` call; bounds peak memory
    pub batch_size: usize,

    /// Cap on raw records examined per coin per run
    pub tx_limit: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            tx_limit: 1000,
        }
    }
}

/// An immutable, versioned view of the bridge configuration.
///
/// Handlers are constructed against a snapshot and never observe later
/// edits; configuration changes take effect by building a new snapshot
/// (bumping `version`) and reloading the handler registry with it.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    version: u64,
    coins: HashMap<String, Coin>,
    settings: HashMap<String, CoinSettings>,

    /// Exchange fee as a flat percentage (1 means 1%)
    pub fee_percent: Decimal,

    pub scan: ScanSettings,

    /// Hours between repeated low-balance alerts for the same coin
    pub low_funds_renotify_hours: i64,
}

impl ConfigSnapshot {
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new(1)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn coin(&self, symbol: &str) -> Option<&Coin> {
        self.coins.get(&symbol.to_uppercase())
    }

    pub fn coins(&self) -> impl Iterator<Item = &Coin> {
        self.coins.values()
    }

    pub fn enabled_coins(&self) -> Vec<Coin> {
        let mut coins: Vec<Coin> = self.coins.values().filter(|c| c.enabled).cloned().collect();
        coins.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        coins
    }

    /// Settings for a coin, falling back to defaults when the operator
    /// configured nothing.
    pub fn settings_for(&self, symbol: &str) -> CoinSettings {
        self.settings
            .get(&symbol.to_uppercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn low_funds_renotify(&self) -> Duration {
        Duration::hours(self.low_funds_renotify_hours)
    }

    /// Start a builder pre-populated with this snapshot's contents and the
    /// next version number. This is the only supported way to "change"
    /// configuration.
    pub fn to_builder(&self) -> SnapshotBuilder {
        SnapshotBuilder {
            version: self.version + 1,
            coins: self.coins.clone(),
            settings: self.settings.clone(),
            fee_percent: self.fee_percent,
            scan: self.scan,
            low_funds_renotify_hours: self.low_funds_renotify_hours,
        }
    }
}

pub struct SnapshotBuilder {
    version: u64,
    coins: HashMap<String, Coin>,
    settings: HashMap<String, CoinSettings>,
    fee_percent: Decimal,
    scan: ScanSettings,
    low_funds_renotify_hours: i64,
}

impl SnapshotBuilder {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            coins: HashMap::new(),
            settings: HashMap::new(),
            fee_percent: Decimal::ZERO,
            scan: ScanSettings::default(),
            low_funds_renotify_hours: 12,
        }
    }

    pub fn coin(mut self, coin: Coin) -> Self {
        self.coins.insert(coin.symbol.clone(), coin);
        self
    }

    pub fn coin_settings(mut self, symbol: impl Into<String>, settings: CoinSettings) -> Self {
        self.settings.insert(symbol.into().to_uppercase(), settings);
        self
    }

    pub fn fee_percent(mut self, fee_percent: Decimal) -> Self {
        self.fee_percent = fee_percent;
        self
    }

    pub fn scan(mut self, scan: ScanSettings) -> Self {
        self.scan = scan;
        self
    }

    pub fn low_funds_renotify_hours(mut self, hours: i64) -> Self {
        self.low_funds_renotify_hours = hours;
        self
    }

    pub fn build(self) -> ConfigSnapshot {
        ConfigSnapshot {
            version: self.version,
            coins: self.coins,
            settings: self.settings,
            fee_percent: self.fee_percent,
            scan: self.scan,
            low_funds_renotify_hours: self.low_funds_renotify_hours,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let snapshot = ConfigSnapshot::builder()
            .coin(Coin::new("LTC", "bitcoind"))
            .build();
        assert!(snapshot.coin("ltc").is_some());
        assert!(snapshot.coin("BTC").is_none());
    }

    #[test]
    fn enabled_coins_skips_disabled() {
        let snapshot = ConfigSnapshot::builder()
            .coin(Coin::new("LTC", "bitcoind"))
            .coin(Coin::new("BTC", "bitcoind").disabled())
            .build();
        let enabled = snapshot.enabled_coins();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].symbol, "LTC");
    }

    #[test]
    fn to_builder_bumps_version_and_keeps_contents() {
        let v1 = ConfigSnapshot::builder()
            .coin(Coin::new("LTC", "bitcoind"))
            .fee_percent(Decimal::ONE)
            .build();
        assert_eq!(v1.version(), 1);

        let v2 = v1.to_builder().coin(Coin::new("BTC", "bitcoind")).build();
        assert_eq!(v2.version(), 2);
        assert!(v2.coin("LTC").is_some());
        assert!(v2.coin("BTC").is_some());
        assert_eq!(v2.fee_percent, Decimal::ONE);

        // The original snapshot is untouched
        assert!(v1.coin("BTC").is_none());
    }

    #[test]
    fn missing_settings_fall_back_to_defaults() {
        let snapshot = ConfigSnapshot::builder().coin(Coin::new("LTC", "bitcoind")).build();
        assert_eq!(snapshot.settings_for("LTC").host, "127.0.0.1");
    }
}
