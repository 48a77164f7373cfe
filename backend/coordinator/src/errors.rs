//! Application-wide error types.
//!
//! Every [`CoordinatorError`] maps onto exactly one [`ErrorKind`]. The kind,
//! not the message text, is what callers branch on: a `StateConflict` means
//! "re-fetch and show current truth", a `LedgerTransactionFailed` means "the
//! user may retry as a new transaction", and a `PersistenceFailure` means the
//! chain moved but the mirror has not caught up yet.

use serde::Serialize;
use thiserror::Error;

use crate::model::BountyStatus;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bounty {0} not found")]
    BountyNotFound(i64),

    #[error("Submission {0} not found")]
    SubmissionNotFound(i64),

    #[error("User {0} not found")]
    UserNotFound(i64),

    #[error("Transaction {0} not found")]
    TransactionNotFound(String),

    #[error("Bounty {bounty_id} is not active (status: {status})")]
    BountyNotActive { bounty_id: i64, status: BountyStatus },

    #[error("Bounty {bounty_id} deadline has passed")]
    DeadlinePassed { bounty_id: i64 },

    #[error("Submission {submission_id} is already the winner")]
    AlreadyWinner { submission_id: i64 },

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Ledger transaction failed: {reason}")]
    LedgerTransactionFailed {
        tx_hash: Option<String>,
        reason: String,
    },

    #[error("Transaction {tx_hash} confirmed on-chain but not yet reflected: {source}")]
    PersistenceFailure {
        tx_hash: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("ABI decode error: {0}")]
    Abi(String),
}

/// Coarse error classification exposed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Unauthorized,
    StateConflict,
    LedgerTransactionFailed,
    PersistenceFailure,
    Internal,
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::BountyNotFound(_)
            | Self::SubmissionNotFound(_)
            | Self::UserNotFound(_)
            | Self::TransactionNotFound(_) => ErrorKind::NotFound,
            Self::BountyNotActive { .. }
            | Self::DeadlinePassed { .. }
            | Self::AlreadyWinner { .. }
            | Self::StateConflict(_) => ErrorKind::StateConflict,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::LedgerTransactionFailed { .. } => ErrorKind::LedgerTransactionFailed,
            Self::PersistenceFailure { .. } => ErrorKind::PersistenceFailure,
            Self::Database(_)
            | Self::Migrate(_)
            | Self::Http(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::Rpc(_)
            | Self::Abi(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code, finer than [`ErrorKind`].
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::BountyNotFound(_) => "bounty_not_found",
            Self::SubmissionNotFound(_) => "submission_not_found",
            Self::UserNotFound(_) => "user_not_found",
            Self::TransactionNotFound(_) => "transaction_not_found",
            Self::BountyNotActive { .. } => "bounty_not_active",
            Self::DeadlinePassed { .. } => "deadline_passed",
            Self::AlreadyWinner { .. } => "already_winner",
            Self::StateConflict(_) => "state_conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::LedgerTransactionFailed { .. } => "ledger_transaction_failed",
            Self::PersistenceFailure { .. } => "confirmed_not_reflected",
            _ => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_and_ledger_failures_are_distinct_kinds() {
        let conflict = CoordinatorError::BountyNotActive {
            bounty_id: 1,
            status: BountyStatus::Completed,
        };
        let failed = CoordinatorError::LedgerTransactionFailed {
            tx_hash: None,
            reason: "reverted".to_string(),
        };
        assert_eq!(conflict.kind(), ErrorKind::StateConflict);
        assert_eq!(failed.kind(), ErrorKind::LedgerTransactionFailed);
        assert_ne!(conflict.code(), failed.code());
    }

    #[test]
    fn persistence_failure_keeps_tx_hash() {
        let err = CoordinatorError::PersistenceFailure {
            tx_hash: "0xabc".to_string(),
            source: sqlx::Error::PoolTimedOut,
        };
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert_eq!(err.code(), "confirmed_not_reflected");
        assert!(err.to_string().contains("0xabc"));
    }
}
