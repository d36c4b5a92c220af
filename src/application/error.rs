use serde::Serialize;
use thiserror::Error;

use crate::domain::{AccountId, Cents, TransactionId, format_cents};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Insufficient funds in account {account_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: Cents,
        required: Cents,
    },

    /// Only produced by the inconsistent write path.
    #[error("{0}")]
    Inconsistent(InconsistencyReport),

    #[error("Persistence failure: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

/// What the inconsistent write path left behind after a partial failure.
///
/// The transaction row is durable but the stored balance still holds
/// `original_balance`; `attempted_balance` is the value that was never saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InconsistencyReport {
    pub transaction_id: TransactionId,
    pub original_balance: Cents,
    pub attempted_balance: Cents,
    pub cause: String,
}

impl std::fmt::Display for InconsistencyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DATA INCONSISTENCY: transaction {} was recorded but the balance update failed \
             ({}); stored balance is still {}, expected {}",
            self.transaction_id,
            self.cause,
            format_cents(self.original_balance),
            format_cents(self.attempted_balance)
        )
    }
}

impl AppError {
    /// True for errors raised before any write was attempted.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::AccountNotFound(_)
                | AppError::AccountAlreadyExists(_)
                | AppError::TransactionNotFound(_)
                | AppError::InsufficientFunds { .. }
        )
    }
}
