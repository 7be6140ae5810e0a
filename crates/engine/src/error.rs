use coinbridge_handlers::RegistryError;
use coinbridge_store::StoreError;
use coinbridge_types::{Conversion, StateError};
use rust_decimal::Decimal;
use thiserror::Error;

/// Classified conversion fault, decided once by the engine and consumed
/// once by the orchestrator.
///
/// `Invalid` is a sender/mapping mistake (deposit → `inv`, never retried);
/// everything else is a system-side problem (deposit → `err`, operator
/// investigates). Retryable situations are NOT errors — they are
/// [`ConvertOutcome::Deferred`].
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid deposit: {0}")]
    Invalid(String),

    #[error("conversion fault: {0}")]
    Fault(String),

    #[error("authority/config fault: {0}")]
    Authority(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ConvertError {
    pub fn is_invalid(&self) -> bool {
        matches!(self, ConvertError::Invalid(_))
    }
}

impl From<StateError> for ConvertError {
    fn from(e: StateError) -> Self {
        ConvertError::Fault(e.to_string())
    }
}

impl From<RegistryError> for ConvertError {
    fn from(e: RegistryError) -> Self {
        ConvertError::Authority(e.to_string())
    }
}

/// Why a conversion attempt was deferred rather than executed. The deposit
/// stays `mapped`; a later scheduled run will try again.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferReason {
    /// Destination network failed its health check
    Unhealthy { coin: String },

    /// Destination hot wallet cannot cover the send
    LowBalance {
        coin: String,
        needed: Decimal,
        available: Decimal,
    },
}

impl std::fmt::Display for DeferReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeferReason::Unhealthy { coin } => write!(f, "network {coin} is unhealthy"),
            DeferReason::LowBalance {
                coin,
                needed,
                available,
            } => write!(
                f,
                "{coin} hot wallet balance too low: needed {needed}, available {available}"
            ),
        }
    }
}

/// Result of a conversion attempt that did not fail.
#[derive(Debug)]
pub enum ConvertOutcome {
    Converted(Conversion),
    Deferred(DeferReason),
}
