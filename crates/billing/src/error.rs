//! Settlement error types
//!
//! Settlement failures split into two classes: transient failures (lock
//! contention, deadlock, timeout) are retried with backoff, permanent
//! failures (missing account, insufficient balance) go straight to a
//! compensation task.

use thiserror::Error;
use tollgate_shared::AccountId;

/// Errors from the settlement transaction
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("insufficient balance: have {balance_cents} cents, need {required_cents} cents")]
    InsufficientFunds {
        balance_cents: i64,
        required_cents: i64,
    },

    #[error("caller account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("caller account is inactive: {0}")]
    AccountInactive(AccountId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for settlement operations
pub type SettlementResult<T> = Result<T, SettlementError>;

/// Postgres SQLSTATE codes that indicate contention rather than a bad request
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available (lock_timeout exceeded)
    "57014", // query_canceled (statement_timeout exceeded)
];

impl SettlementError {
    /// Returns true if this failure is worth retrying
    ///
    /// Only contention-shaped database errors are transient. Insufficient
    /// balance and missing or inactive accounts will not heal on their own,
    /// so retrying them just delays the compensation task.
    pub fn is_transient(&self) -> bool {
        match self {
            SettlementError::InsufficientFunds { .. }
            | SettlementError::AccountNotFound(_)
            | SettlementError::AccountInactive(_) => false,
            SettlementError::Database(err) => match err {
                sqlx::Error::Database(db_err) => db_err
                    .code()
                    .map(|code| TRANSIENT_SQLSTATES.contains(&code.as_ref()))
                    .unwrap_or(false),
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
                _ => false,
            },
        }
    }
}
