use coinbridge_engine::DeferReason;

/// One schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Scan one coin's network for incoming transfers
    ScanCoin { symbol: String },

    /// Validate a `new` deposit and resolve its destination
    ValidateDeposit { deposit_id: i64 },

    /// Convert a `mapped` deposit
    ConvertDeposit { deposit_id: i64 },

    /// Operator-invoked refund
    RefundDeposit {
        deposit_id: i64,
        reason: Option<String>,
        return_to: Option<String>,
    },
}

impl Task {
    /// The distributed-lock key guarding this task.
    ///
    /// All per-deposit work shares one key, so validation, conversion and
    /// refund of the same deposit can never interleave — this is the
    /// mechanism that keeps `send` at-most-once per deposit.
    pub fn lock_key(&self) -> String {
        match self {
            Task::ScanCoin { symbol } => format!("scan:{symbol}"),
            Task::ValidateDeposit { deposit_id }
            | Task::ConvertDeposit { deposit_id }
            | Task::RefundDeposit { deposit_id, .. } => format!("deposit:{deposit_id}"),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Task::ScanCoin { symbol } => format!("scan {symbol}"),
            Task::ValidateDeposit { deposit_id } => format!("validate deposit {deposit_id}"),
            Task::ConvertDeposit { deposit_id } => format!("convert deposit {deposit_id}"),
            Task::RefundDeposit { deposit_id, .. } => format!("refund deposit {deposit_id}"),
        }
    }
}

/// What happened to one task attempt.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Work done; detail is human-readable
    Completed(String),

    /// Not attempted this round (lock held, no loader, dead api). Not an
    /// error, no state was changed.
    Skipped(String),

    /// Attempted, deliberately deferred to a later run
    Deferred(DeferReason),

    /// Deposit classified as a sender/mapping fault (now `inv`)
    Invalid(String),

    /// System fault (deposit now `err`, or the task itself failed)
    Failed(String),
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }
}
