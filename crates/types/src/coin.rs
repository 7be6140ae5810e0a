use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A configured network or token the bridge can receive and send.
///
/// `symbol` is the unique routing key used throughout the system and is
/// always stored uppercase. `symbol_id` is the symbol as the underlying
/// network knows it (e.g. the pegged token `LTCP` may have a native
/// `symbol_id` of `LTC` on its issuing network); it defaults to `symbol`.
///
/// Connection settings (host, credentials, custom fields) are NOT part of
/// this type — they live in the versioned configuration snapshot so that
/// handler instances never read mutable shared state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Unique routing symbol, uppercase
    pub symbol: String,

    /// Native network symbol, uppercase; defaults to `symbol`
    pub symbol_id: String,

    /// Human-readable name for operator display
    pub display_name: String,

    /// Handler family serving this coin (e.g. "bitcoind", "graphene", "mock")
    pub network_type: String,

    /// Disabled coins are neither scanned nor convertible
    pub enabled: bool,

    /// Our receiving account/address, required by account-based networks
    pub our_account: Option<String>,

    /// Whether the operator can issue (mint) this token
    pub can_issue: bool,

    /// Operator opted in to low hot-wallet balance alerts
    pub notify_low_funds: bool,
}

impl Coin {
    pub fn new(symbol: impl Into<String>, network_type: impl Into<String>) -> Self {
        let symbol = symbol.into().to_uppercase();
        Self {
            symbol_id: symbol.clone(),
            display_name: symbol.clone(),
            symbol,
            network_type: network_type.into(),
            enabled: true,
            our_account: None,
            can_issue: false,
            notify_low_funds: false,
        }
    }

    pub fn with_symbol_id(mut self, symbol_id: impl Into<String>) -> Self {
        self.symbol_id = symbol_id.into().to_uppercase();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_our_account(mut self, account: impl Into<String>) -> Self {
        self.our_account = Some(account.into());
        self
    }

    pub fn issuable(mut self) -> Self {
        self.can_issue = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_low_funds_alerts(mut self) -> Self {
        self.notify_low_funds = true;
        self
    }
}

impl std::fmt::Display for Coin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, self.symbol)
    }
}

/// Mutable per-coin alerting state, persisted in the store so that
/// low-balance notification damping survives restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinFlags {
    pub symbol: String,

    /// Deposits are currently stuck on this coin due to low hot-wallet balance
    pub funds_low: bool,

    /// When the operator was last notified of a low balance
    pub last_notified: Option<DateTime<Utc>>,
}

impl CoinFlags {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            funds_low: false,
            last_notified: None,
        }
    }

    /// Whether a low-balance alert should go out now.
    ///
    /// The first alert after the balance drops is sent immediately; repeat
    /// alerts are suppressed until `renotify_after` has elapsed since the
    /// previous one. Once the wallet is topped up the orchestrator clears
    /// `funds_low`, re-arming the immediate alert.
    pub fn should_notify_low(&self, coin: &Coin, renotify_after: Duration, now: DateTime<Utc>) -> bool {
        if !coin.notify_low_funds {
            return false;
        }
        if self.funds_low {
            return match self.last_notified {
                Some(at) => now - at > renotify_after,
                None => true,
            };
        }
        true
    }

    pub fn mark_notified(&mut self, now: DateTime<Utc>) {
        self.funds_low = true;
        self.last_notified = Some(now);
    }
}
