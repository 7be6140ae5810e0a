//! Configuration loading from files and the environment.

use coinbridge_types::Coin;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{CoinSettings, ConfigError, ConfigSnapshot, Result, ScanSettings, SnapshotBuilder};

/// On-disk bridge configuration.
///
/// Supports TOML, YAML, and JSON based on file extension; environment
/// variables with a `COINBRIDGE__` prefix override file values
/// (e.g. `COINBRIDGE__EXCHANGE__FEE_PERCENT=1`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub exchange: ExchangeSection,

    #[serde(default)]
    pub scan: ScanSection,

    #[serde(default)]
    pub coins: Vec<CoinEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSection {
    /// Flat exchange fee percentage taken from every conversion
    #[serde(default)]
    pub fee_percent: Decimal,

    #[serde(default = "default_renotify_hours")]
    pub low_funds_renotify_hours: i64,
}

fn default_renotify_hours() -> i64 {
    12
}

impl Default for ExchangeSection {
    fn default() -> Self {
        Self {
            fee_percent: Decimal::ZERO,
            low_funds_renotify_hours: default_renotify_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_tx_limit")]
    pub tx_limit: usize,
}

fn default_batch_size() -> usize {
    100
}

fn default_tx_limit() -> usize {
    1000
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            tx_limit: default_tx_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinEntry {
    pub symbol: String,
    pub network_type: String,

    #[serde(default)]
    pub symbol_id: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub our_account: Option<String>,

    #[serde(default)]
    pub can_issue: bool,

    #[serde(default)]
    pub notify_low_funds: bool,

    #[serde(default)]
    pub settings: CoinSettings,
}

fn default_true() -> bool {
    true
}

impl CoinEntry {
    fn to_coin(&self) -> Coin {
        let mut coin = Coin::new(&self.symbol, &self.network_type);
        if let Some(symbol_id) = &self.symbol_id {
            coin = coin.with_symbol_id(symbol_id);
        }
        if let Some(name) = &self.display_name {
            coin = coin.with_display_name(name);
        }
        if let Some(account) = &self.our_account {
            coin = coin.with_our_account(account);
        }
        if self.can_issue {
            coin = coin.issuable();
        }
        if self.notify_low_funds {
            coin = coin.with_low_funds_alerts();
        }
        if !self.enabled {
            coin = coin.disabled();
        }
        coin
    }
}

impl BridgeConfig {
    /// Build a fresh snapshot with the given version from this configuration.
    pub fn into_snapshot(self, version: u64) -> ConfigSnapshot {
        let mut builder = SnapshotBuilder::new(version)
            .fee_percent(self.exchange.fee_percent)
            .low_funds_renotify_hours(self.exchange.low_funds_renotify_hours)
            .scan(ScanSettings {
                batch_size: self.scan.batch_size,
                tx_limit: self.scan.tx_limit,
            });
        for entry in &self.coins {
            builder = builder
                .coin(entry.to_coin())
                .coin_settings(&entry.symbol, entry.settings.clone());
        }
        builder.build()
    }
}

/// Configuration loader with support for multiple formats and sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file, dispatching on extension.
    pub fn from_file(path: &Path) -> Result<BridgeConfig> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ConfigError::Load("no file extension found".to_string()))?;

        let content = std::fs::read_to_string(path)?;

        match extension {
            "toml" => Self::from_toml(&content),
            "yaml" | "yml" => Self::from_yaml(&content),
            "json" => Self::from_json(&content),
            _ => Err(ConfigError::Load(format!(
                "unsupported file extension: {}",
                extension
            ))),
        }
    }

    pub fn from_toml(content: &str) -> Result<BridgeConfig> {
        toml::from_str(content).map_err(ConfigError::from)
    }

    pub fn from_yaml(content: &str) -> Result<BridgeConfig> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    pub fn from_json(content: &str) -> Result<BridgeConfig> {
        serde_json::from_str(content).map_err(ConfigError::from)
    }

    /// Load overrides from environment variables, `PREFIX__SECTION__KEY`.
    pub fn from_env_with_prefix(prefix: &str) -> Result<BridgeConfig> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(prefix).separator("__"))
            .build()?;
        config.try_deserialize().map_err(ConfigError::from)
    }

    /// Load a file, then overlay any environment overrides on top.
    pub fn from_file_with_env(path: &Path, env_prefix: &str) -> Result<BridgeConfig> {
        let file_config = Self::from_file(path)?;

        // Every section deserialises from an empty environment, so an
        // unconditional overlay would reset file values to defaults; only
        // merge when the prefix is actually in use
        let marker = format!("{env_prefix}__");
        if !std::env::vars().any(|(k, _)| k.starts_with(&marker)) {
            return Ok(file_config);
        }

        match Self::from_env_with_prefix(env_prefix) {
            Ok(env_config) => Ok(Self::merge(file_config, env_config)),
            Err(_) => Ok(file_config),
        }
    }

    /// Merge two configurations; `overlay` wins per section, coin lists are
    /// combined with overlay entries replacing same-symbol base entries.
    pub fn merge(base: BridgeConfig, overlay: BridgeConfig) -> BridgeConfig {
        let mut coins = base.coins;
        for entry in overlay.coins {
            coins.retain(|c| !c.symbol.eq_ignore_ascii_case(&entry.symbol));
            coins.push(entry);
        }
        BridgeConfig {
            exchange: overlay.exchange,
            scan: overlay.scan,
            coins,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[exchange]
fee_percent = "1"

[scan]
batch_size = 50

[[coins]]
symbol = "ltc"
network_type = "bitcoind"

[[coins]]
symbol = "LTCP"
network_type = "graphene"
symbol_id = "LTC"
our_account = "bridge"
can_issue = true

[coins.settings]
host = "rpc.example.com"
port = 8332

[coins.settings.custom]
confirms_needed = "3"
"#;

    #[test]
    fn toml_round_trip_into_snapshot() {
        let config = ConfigLoader::from_toml(SAMPLE).unwrap();
        let snapshot = config.into_snapshot(1);

        assert_eq!(snapshot.fee_percent, Decimal::ONE);
        assert_eq!(snapshot.scan.batch_size, 50);
        assert_eq!(snapshot.scan.tx_limit, 1000);

        let ltc = snapshot.coin("LTC").unwrap();
        assert_eq!(ltc.network_type, "bitcoind");
        assert!(!ltc.can_issue);

        let ltcp = snapshot.coin("LTCP").unwrap();
        assert_eq!(ltcp.symbol_id, "LTC");
        assert!(ltcp.can_issue);
        assert_eq!(ltcp.our_account.as_deref(), Some("bridge"));

        let settings = snapshot.settings_for("ltcp");
        assert_eq!(settings.host, "rpc.example.com");
        assert_eq!(settings.port, Some(8332));
        assert_eq!(settings.custom_u64("confirms_needed"), Some(3));
    }

    #[test]
    fn from_file_dispatches_on_extension() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = ConfigLoader::from_file(file.path()).unwrap();
        assert_eq!(config.coins.len(), 2);

        let bogus = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(ConfigLoader::from_file(bogus.path()).is_err());
    }

    #[test]
    fn merge_replaces_same_symbol_entries() {
        let base = ConfigLoader::from_toml(SAMPLE).unwrap();
        let overlay = ConfigLoader::from_toml(
            r#"
[[coins]]
symbol = "LTC"
network_type = "bitcoind"
enabled = false
"#,
        )
        .unwrap();

        let merged = ConfigLoader::merge(base, overlay);
        assert_eq!(merged.coins.len(), 2);
        let ltc = merged.coins.iter().find(|c| c.symbol == "LTC").unwrap();
        assert!(!ltc.enabled);
    }
}
