use async_trait::async_trait;
use coinbridge_handlers::DepositTarget;
use rust_decimal::Decimal;
use std::sync::Mutex;
use tracing::warn;

/// Details for a "hot wallet is low" alert.
#[derive(Debug, Clone)]
pub struct LowBalanceNotice {
    pub coin: String,
    pub needed: Decimal,
    pub available: Decimal,

    /// How many mapped deposits are stuck waiting on this coin
    pub deposits_waiting: usize,

    /// Where admins should send funds to refill the wallet
    pub deposit_target: Option<DepositTarget>,
}

/// Fire-and-forget operator notifications.
///
/// Implementations must swallow their own failures — a broken mail relay
/// must never affect deposit processing.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn low_balance(&self, notice: LowBalanceNotice);

    async fn admin_alert(&self, subject: &str, body: &str);
}

/// Default notifier: structured log lines only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn low_balance(&self, notice: LowBalanceNotice) {
        warn!(
            coin = %notice.coin,
            needed = %notice.needed,
            available = %notice.available,
            deposits_waiting = notice.deposits_waiting,
            "hot wallet balance is low"
        );
    }

    async fn admin_alert(&self, subject: &str, body: &str) {
        warn!(%subject, %body, "admin alert");
    }
}

/// Test double that records every notification.
pub struct RecordingNotifier {
    low_balance: Mutex<Vec<LowBalanceNotice>>,
    alerts: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            low_balance: Mutex::new(Vec::new()),
            alerts: Mutex::new(Vec::new()),
        }
    }

    pub fn low_balance_notices(&self) -> Vec<LowBalanceNotice> {
        self.low_balance.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn alerts(&self) -> Vec<(String, String)> {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn low_balance(&self, notice: LowBalanceNotice) {
        self.low_balance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notice);
    }

    async fn admin_alert(&self, subject: &str, body: &str) {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((subject.to_string(), body.to_string()));
    }
}
