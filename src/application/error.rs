use thiserror::Error;

use crate::domain::{AccountId, Cents, InvalidAccountId};
use crate::storage;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid deduplication key: {0}")]
    InvalidDedupKey(String),

    #[error("Invalid account id: {0}")]
    InvalidAccountId(#[from] InvalidAccountId),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(AccountId),

    #[error("Insufficient funds in account {account}: balance {balance}, required {required}")]
    InsufficientFunds {
        account: AccountId,
        balance: Cents,
        required: Cents,
    },

    #[error("Deduplication key '{key}' on account {account} belongs to a different request")]
    IdempotencyConflict { account: AccountId, key: String },

    #[error("Storage unavailable, retry later: {0}")]
    StorageUnavailable(#[source] anyhow::Error),

    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl AppError {
    /// True when the same request may succeed if submitted again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StorageUnavailable(_))
    }

    /// True for outcomes that are the caller's business, not a fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::InvalidAmount(_)
                | AppError::InvalidDedupKey(_)
                | AppError::InvalidAccountId(_)
                | AppError::AccountNotFound(_)
                | AppError::AccountAlreadyExists(_)
                | AppError::InsufficientFunds { .. }
                | AppError::IdempotencyConflict { .. }
        )
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if storage::is_transient(&err) {
            AppError::StorageUnavailable(err)
        } else {
            AppError::Database(err)
        }
    }
}
