//! Error types for the ledger
//!
//! Every fallible ledger operation returns [`LedgerResult`]. The variants are
//! descriptive enough for log output, and [`LedgerError::kind`] collapses them
//! onto the five kinds callers branch on.
//!
//! # Error Categories
//!
//! - **NotFound**: a referenced account, entry or transfer does not exist
//! - **InvalidArgument**: bad input (non-positive amount, same account on both
//!   sides, unsupported currency, deletion of an account with history)
//! - **InsufficientFunds**: rejected by the overdraft policy
//! - **SerializationConflict**: transient storage contention, retryable
//! - **Internal**: storage failure, not retryable

use thiserror::Error;

use super::account::AccountId;

/// Result type used across the ledger
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Coarse classification of a [`LedgerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    InsufficientFunds,
    SerializationConflict,
    Internal,
}

/// Main error type for the ledger
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// A referenced row does not exist
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of row ("account", "entry", "transfer")
        entity: &'static str,
        /// Identifier that was looked up
        id: i64,
    },

    /// The request itself is malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Currency code outside the supported set
    #[error("unsupported currency '{0}'")]
    InvalidCurrency(String),

    /// A write would break a reference between rows
    ///
    /// Raised when an entry or transfer points at a missing account, and when an
    /// account that still has history is deleted.
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// The overdraft policy rejected a debit
    #[error("insufficient funds in account {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Account that would go negative
        account: AccountId,
        /// Balance at the time of the check (minor units)
        balance: i64,
        /// Amount requested (minor units)
        requested: i64,
    },

    /// Two transactions could not both commit, or a lock wait timed out
    #[error("serialization conflict: {0}")]
    SerializationConflict(String),

    /// Storage failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Create a NotFound error for an account
    pub fn account_not_found(id: AccountId) -> Self {
        LedgerError::NotFound {
            entity: "account",
            id,
        }
    }

    /// Create a NotFound error for an entry
    pub fn entry_not_found(id: i64) -> Self {
        LedgerError::NotFound { entity: "entry", id }
    }

    /// Create a NotFound error for a transfer
    pub fn transfer_not_found(id: i64) -> Self {
        LedgerError::NotFound {
            entity: "transfer",
            id,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        LedgerError::InvalidArgument(message.into())
    }

    pub fn invalid_currency(code: impl Into<String>) -> Self {
        LedgerError::InvalidCurrency(code.into())
    }

    pub fn foreign_key(message: impl Into<String>) -> Self {
        LedgerError::ForeignKeyViolation(message.into())
    }

    pub fn insufficient_funds(account: AccountId, balance: i64, requested: i64) -> Self {
        LedgerError::InsufficientFunds {
            account,
            balance,
            requested,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        LedgerError::SerializationConflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        LedgerError::Internal(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::InvalidArgument(_)
            | LedgerError::InvalidCurrency(_)
            | LedgerError::ForeignKeyViolation(_) => ErrorKind::InvalidArgument,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::SerializationConflict(_) => ErrorKind::SerializationConflict,
            LedgerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only serialization conflicts may be retried by the caller
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::SerializationConflict
    }
}
