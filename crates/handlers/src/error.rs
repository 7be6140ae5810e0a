use rust_decimal::Decimal;
use thiserror::Error;

/// Everything a network handler can fail with.
///
/// The orchestration layers never match on message text — `kind()` and
/// `is_transient()` are the contract. `DeadApi` is deliberately distinct
/// from `Rpc`: a hard-down upstream means "skip this coin for this run",
/// not "burn the retry budget".
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("token not found: {0}")]
    TokenNotFound(String),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("not enough balance: needed {needed}, available {available}")]
    NotEnoughBalance { needed: Decimal, available: Decimal },

    #[error("authority missing for network {network}, account {account}")]
    AuthorityMissing { network: String, account: String },

    #[error("issuing not supported for {0}")]
    IssueNotSupported(String),

    #[error("dead api: {0}")]
    DeadApi(String),

    #[error("missing token metadata for {coin}: {detail}")]
    MissingTokenMetadata { coin: String, detail: String },

    #[error("rpc error: {0}")]
    Rpc(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerErrorKind {
    TokenNotFound,
    AccountNotFound,
    NotEnoughBalance,
    AuthorityMissing,
    IssueNotSupported,
    DeadApi,
    MissingTokenMetadata,
    Rpc,
}

impl HandlerError {
    pub fn kind(&self) -> HandlerErrorKind {
        match self {
            HandlerError::TokenNotFound(_) => HandlerErrorKind::TokenNotFound,
            HandlerError::AccountNotFound(_) => HandlerErrorKind::AccountNotFound,
            HandlerError::NotEnoughBalance { .. } => HandlerErrorKind::NotEnoughBalance,
            HandlerError::AuthorityMissing { .. } => HandlerErrorKind::AuthorityMissing,
            HandlerError::IssueNotSupported(_) => HandlerErrorKind::IssueNotSupported,
            HandlerError::DeadApi(_) => HandlerErrorKind::DeadApi,
            HandlerError::MissingTokenMetadata { .. } => HandlerErrorKind::MissingTokenMetadata,
            HandlerError::Rpc(_) => HandlerErrorKind::Rpc,
        }
    }

    /// Whether an inline retry of the same call could plausibly succeed.
    ///
    /// Balance and health problems are NOT transient in this sense — they
    /// are deferred to the next scheduled run instead of being retried in a
    /// tight loop against an empty hot wallet.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), HandlerErrorKind::Rpc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rpc_errors_are_transient() {
        assert!(HandlerError::Rpc("timeout".into()).is_transient());
        assert!(!HandlerError::DeadApi("down".into()).is_transient());
        assert!(!HandlerError::NotEnoughBalance {
            needed: Decimal::TEN,
            available: Decimal::ONE,
        }
        .is_transient());
        assert!(!HandlerError::AccountNotFound("nobody".into()).is_transient());
    }
}
