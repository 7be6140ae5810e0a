use chrono::Utc;
use coinbridge_engine::{ConversionEngine, ConvertError, ConvertOutcome};
use coinbridge_handlers::{HandlerRegistry, RegistryError};
use coinbridge_scanner::{BatchScanner, ScanError};
use coinbridge_store::{BridgeStore, StoreError};
use coinbridge_sync::{LockError, LockManager};
use coinbridge_types::DepositStatus;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{Task, TaskOutcome};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Concurrent workers pulling tasks
    pub worker_count: usize,

    /// Wall-clock bound per task; exceeding it is a system fault for that
    /// task only
    pub task_timeout: Duration,

    /// How long a crashed worker can hold a deposit lock
    pub lock_ttl: Duration,

    /// Deposits pulled per status per cycle; bounds cycle memory
    pub status_batch: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            task_timeout: Duration::from_secs(120),
            lock_ttl: Duration::from_secs(300),
            status_batch: 200,
        }
    }
}

/// Outcome counts for one orchestration cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub completed: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub invalid: usize,
    pub failed: usize,
}

impl CycleSummary {
    fn absorb(&mut self, results: &[(Task, TaskOutcome)]) {
        for (_, outcome) in results {
            match outcome {
                TaskOutcome::Completed(_) => self.completed += 1,
                TaskOutcome::Skipped(_) => self.skipped += 1,
                TaskOutcome::Deferred(_) => self.deferred += 1,
                TaskOutcome::Invalid(_) => self.invalid += 1,
                TaskOutcome::Failed(_) => self.failed += 1,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Validation,
    Conversion,
    Refund,
}

/// Schedules scanning, validation, conversion and refunds as lock-guarded,
/// timeout-bounded units of work, and is the single place that maps a
/// classified fault onto a deposit's status.
pub struct TaskOrchestrator {
    engine: Arc<ConversionEngine>,
    store: Arc<dyn BridgeStore>,
    registry: Arc<HandlerRegistry>,
    locks: Arc<dyn LockManager>,
    config: OrchestratorConfig,
}

impl TaskOrchestrator {
    pub fn new(
        engine: Arc<ConversionEngine>,
        locks: Arc<dyn LockManager>,
        config: OrchestratorConfig,
    ) -> Self {
        let store = Arc::clone(engine.store());
        let registry = Arc::clone(engine.registry());
        Self {
            engine,
            store,
            registry,
            locks,
            config,
        }
    }

    /// Run one full pass: scan every loader-bearing coin, validate `new`
    /// deposits, convert `mapped` ones, then clear resolved low-funds
    /// flags.
    pub async fn run_cycle(&self) -> Result<CycleSummary, OrchestratorError> {
        let cycle = Uuid::new_v4();
        info!(%cycle, "starting bridge cycle");
        let mut summary = CycleSummary::default();

        let scans: Vec<Task> = self
            .registry
            .loader_symbols()
            .into_iter()
            .map(|symbol| Task::ScanCoin { symbol })
            .collect();
        summary.absorb(&self.run_tasks(scans).await);

        let validates: Vec<Task> = self
            .store
            .deposits_by_status(DepositStatus::New, self.config.status_batch)
            .await?
            .into_iter()
            .map(|d| Task::ValidateDeposit { deposit_id: d.id })
            .collect();
        summary.absorb(&self.run_tasks(validates).await);

        let converts: Vec<Task> = self
            .store
            .deposits_by_status(DepositStatus::Mapped, self.config.status_batch)
            .await?
            .into_iter()
            .map(|d| Task::ConvertDeposit { deposit_id: d.id })
            .collect();
        summary.absorb(&self.run_tasks(converts).await);

        let cleared = self.clear_low_funds().await?;
        info!(%cycle, ?summary, cleared_low_funds = cleared, "bridge cycle finished");
        Ok(summary)
    }

    /// Run tasks on a bounded worker pool. Ordering across tasks is not
    /// guaranteed; per-deposit exclusion comes from the lock keys.
    pub async fn run_tasks(&self, tasks: Vec<Task>) -> Vec<(Task, TaskOutcome)> {
        futures::stream::iter(tasks)
            .map(|task| async move {
                let outcome = self.process(&task).await;
                (task, outcome)
            })
            .buffer_unordered(self.config.worker_count.max(1))
            .collect()
            .await
    }

    /// Run one task under its lock and wall-clock budget.
    pub async fn process(&self, task: &Task) -> TaskOutcome {
        let key = task.lock_key();
        let guard = match self.locks.try_acquire(&key, self.config.lock_ttl).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                debug!(%key, "lock already held, skipping for now");
                return TaskOutcome::Skipped(format!("lock {key} is already held"));
            }
            Err(e) => return TaskOutcome::Failed(format!("lock backend error: {e}")),
        };

        let outcome = match tokio::time::timeout(self.config.task_timeout, self.dispatch(task)).await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(task = %task.label(), "task exceeded its wall-clock budget");
                match task {
                    Task::ScanCoin { symbol } => {
                        TaskOutcome::Failed(format!("scan of {symbol} timed out"))
                    }
                    Task::ValidateDeposit { deposit_id }
                    | Task::ConvertDeposit { deposit_id }
                    | Task::RefundDeposit { deposit_id, .. } => {
                        self.fail_deposit(
                            *deposit_id,
                            format!(
                                "{} timed out after {:?}",
                                task.label(),
                                self.config.task_timeout
                            ),
                        )
                        .await
                    }
                }
            }
        };

        drop(guard);
        outcome
    }

    async fn dispatch(&self, task: &Task) -> TaskOutcome {
        match task {
            Task::ScanCoin { symbol } => self.scan_coin(symbol).await,

            Task::ValidateDeposit { deposit_id } => {
                match self.engine.map_deposit(*deposit_id).await {
                    Ok(deposit) => TaskOutcome::Completed(format!(
                        "deposit {} mapped to {}",
                        deposit.id,
                        deposit.convert_to.as_deref().unwrap_or("?")
                    )),
                    Err(e) => self.classify(*deposit_id, e, Stage::Validation).await,
                }
            }

            Task::ConvertDeposit { deposit_id } => {
                match self.engine.convert_deposit(*deposit_id).await {
                    Ok(ConvertOutcome::Converted(conversion)) => TaskOutcome::Completed(format!(
                        "conversion {} recorded for deposit {}",
                        conversion.id, conversion.deposit_id
                    )),
                    Ok(ConvertOutcome::Deferred(reason)) => {
                        debug!(deposit_id, %reason, "conversion deferred");
                        TaskOutcome::Deferred(reason)
                    }
                    Err(e) => self.classify(*deposit_id, e, Stage::Conversion).await,
                }
            }

            Task::RefundDeposit {
                deposit_id,
                reason,
                return_to,
            } => {
                match self
                    .engine
                    .refund_sender(*deposit_id, reason.clone(), return_to.clone())
                    .await
                {
                    Ok((deposit, sent)) => TaskOutcome::Completed(format!(
                        "deposit {} refunded ({} {} to {})",
                        deposit.id,
                        sent.amount,
                        sent.coin,
                        deposit.refund_address.as_deref().unwrap_or("?")
                    )),
                    Err(e) => self.classify(*deposit_id, e, Stage::Refund).await,
                }
            }
        }
    }

    /// The single fault → deposit-status funnel. Every engine error passes
    /// through here exactly once per attempt.
    async fn classify(&self, deposit_id: i64, error: ConvertError, stage: Stage) -> TaskOutcome {
        match error {
            ConvertError::Invalid(reason) => {
                error!(deposit_id, %reason, "deposit failed validation (sender/mapping fault)");
                if let Err(e) = self.set_deposit_invalid(deposit_id, &reason).await {
                    warn!(deposit_id, error = %e, "could not record invalid state");
                    return TaskOutcome::Failed(format!("could not record invalid state: {e}"));
                }
                TaskOutcome::Invalid(reason)
            }
            other => {
                let reason = other.to_string();
                error!(deposit_id, %reason, ?stage, "system fault while processing deposit");
                if stage == Stage::Validation {
                    if let Some(outcome) = self.try_auto_refund(deposit_id, &reason).await {
                        return outcome;
                    }
                }
                self.fail_deposit(deposit_id, reason).await
            }
        }
    }

    async fn set_deposit_invalid(&self, deposit_id: i64, reason: &str) -> Result<(), String> {
        let mut deposit = self
            .store
            .deposit(deposit_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("deposit {deposit_id} does not exist"))?;
        deposit.mark_invalid(reason).map_err(|e| e.to_string())?;
        self.store
            .update_deposit(&deposit)
            .await
            .map_err(|e| e.to_string())
    }

    async fn fail_deposit(&self, deposit_id: i64, reason: String) -> TaskOutcome {
        let recorded: Result<(), String> = async {
            let mut deposit = self
                .store
                .deposit(deposit_id)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("deposit {deposit_id} does not exist"))?;
            if deposit.status.is_settled() {
                return Err(format!(
                    "deposit {deposit_id} is already settled, leaving it untouched"
                ));
            }
            deposit.mark_errored(reason.as_str()).map_err(|e| e.to_string())?;
            self.store
                .update_deposit(&deposit)
                .await
                .map_err(|e| e.to_string())
        }
        .await;

        if let Err(e) = recorded {
            warn!(deposit_id, error = %e, "could not record error state");
        }
        TaskOutcome::Failed(reason)
    }

    /// If the deposit's coin has `auto_refund` enabled, attempt a refund
    /// instead of parking the deposit in `err`.
    async fn try_auto_refund(&self, deposit_id: i64, last_error: &str) -> Option<TaskOutcome> {
        let snapshot = self.registry.snapshot()?;
        let deposit = self.store.deposit(deposit_id).await.ok()??;
        let enabled = snapshot
            .settings_for(&deposit.coin)
            .custom_bool("auto_refund")
            .unwrap_or(false);
        if !enabled {
            return None;
        }

        info!(
            deposit_id,
            coin = %deposit.coin,
            "auto refund is enabled, attempting return to sender"
        );
        match self
            .engine
            .refund_sender(deposit_id, Some(last_error.to_string()), None)
            .await
        {
            Ok((refunded, _)) => Some(TaskOutcome::Completed(format!(
                "deposit {} auto-refunded to {}",
                refunded.id,
                refunded.refund_address.as_deref().unwrap_or("?")
            ))),
            Err(e) => {
                error!(deposit_id, error = %e, "auto refund failed");
                Some(self.fail_deposit(deposit_id, format!("auto refund failure: {e}")).await)
            }
        }
    }

    async fn scan_coin(&self, symbol: &str) -> TaskOutcome {
        if !self.registry.has_loader(symbol) {
            warn!(%symbol, "coin is enabled but no handler provides a loader for it, skipping");
            return TaskOutcome::Skipped(format!("no loader for {symbol}"));
        }
        let loader = match self.registry.get_loader(symbol) {
            Ok(loader) => loader,
            Err(e) => return TaskOutcome::Failed(e.to_string()),
        };

        if let Err(e) = loader.load().await {
            return TaskOutcome::Failed(format!("loader preparation failed: {e}"));
        }
        let symbol_upper = symbol.to_uppercase();
        let Some(coin) = loader.coins().into_iter().find(|c| c.symbol == symbol_upper) else {
            return TaskOutcome::Skipped(format!(
                "coin {symbol_upper} was dropped during loader preparation"
            ));
        };

        let scan_settings = self
            .registry
            .snapshot()
            .map(|s| s.scan)
            .unwrap_or_default();
        let scanner = BatchScanner::new(loader, scan_settings);
        let mut stream = scanner.scan_coin(coin);

        let mut imported = 0usize;
        let mut duplicates = 0usize;
        while let Some(item) = stream.next().await {
            match item {
                Ok(tx) => {
                    let key = tx.key();
                    match self.store.insert_deposit(&tx.into_deposit()).await {
                        Ok(id) => {
                            debug!(deposit_id = id, txid = %key.txid, "stored new deposit");
                            imported += 1;
                        }
                        Err(StoreError::DuplicateDeposit { .. }) => {
                            debug!(txid = %key.txid, vout = key.vout, "deposit already known");
                            duplicates += 1;
                        }
                        Err(e) => {
                            error!(txid = %key.txid, error = %e, "error saving deposit, skipping");
                        }
                    }
                }
                Err(ScanError::DeadApi { coin, reason }) => {
                    warn!(%coin, %reason, "upstream api is down, skipping coin for this run");
                    return TaskOutcome::Skipped(format!("api for {coin} is down"));
                }
                Err(e) => return TaskOutcome::Failed(format!("scan failed: {e}")),
            }
        }

        info!(%symbol_upper, imported, duplicates, "scan finished");
        TaskOutcome::Completed(format!(
            "imported {imported} new deposits ({duplicates} already known)"
        ))
    }

    /// Flip recent `err` deposits back to `new` for another attempt.
    /// Deposits older than `max_age` stay parked for manual review.
    pub async fn reset_errored(
        &self,
        max_age: chrono::Duration,
        coin: Option<&str>,
    ) -> Result<usize, OrchestratorError> {
        let cutoff = Utc::now() - max_age;
        let coin = coin.map(str::to_uppercase);
        let errored = self
            .store
            .deposits_by_status(DepositStatus::Errored, 10_000)
            .await?;

        let mut reset = 0usize;
        for mut deposit in errored {
            if deposit.tx_timestamp < cutoff {
                continue;
            }
            if let Some(coin) = &coin {
                if &deposit.coin != coin {
                    continue;
                }
            }
            info!(deposit_id = deposit.id, "resetting errored deposit to 'new'");
            if deposit.reset_to_new().is_ok() {
                self.store.update_deposit(&deposit).await?;
                reset += 1;
            }
        }
        Ok(reset)
    }

    /// Clear `funds_low` on coins that no longer have mapped deposits
    /// waiting, re-arming the immediate low-balance alert.
    pub async fn clear_low_funds(&self) -> Result<usize, OrchestratorError> {
        let Some(snapshot) = self.registry.snapshot() else {
            return Ok(0);
        };

        let mut cleared = 0usize;
        for coin in snapshot.coins() {
            let mut flags = self.store.coin_flags(&coin.symbol).await?;
            if !flags.funds_low {
                continue;
            }
            if self.store.count_mapped_to(&coin.symbol).await? == 0 {
                debug!(coin = %coin.symbol, "no mapped deposits remain, clearing funds_low");
                flags.funds_low = false;
                self.store.update_coin_flags(&flags).await?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}
