use thiserror::Error;

use crate::domain::{AmountError, Cents, WalletId, format_cents};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error(
        "Insufficient funds in wallet {wallet_id}: balance {}, required {}",
        format_cents(*balance),
        format_cents(*required)
    )]
    InsufficientFunds {
        wallet_id: WalletId,
        balance: Cents,
        required: Cents,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl LedgerError {
    /// Business-rule outcomes are final; only storage faults may succeed on
    /// a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage(_))
    }
}

impl From<AmountError> for LedgerError {
    fn from(err: AmountError) -> Self {
        LedgerError::InvalidAmount(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_storage_errors_are_retryable() {
        assert!(LedgerError::Storage(anyhow::anyhow!("disk full")).is_retryable());
        assert!(!LedgerError::NotFound("wallet 1".into()).is_retryable());
        assert!(
            !LedgerError::InsufficientFunds {
                wallet_id: 1,
                balance: 0,
                required: 1
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_insufficient_funds_message() {
        let err = LedgerError::InsufficientFunds {
            wallet_id: 3,
            balance: 5000,
            required: 7500,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds in wallet 3: balance 50.00, required 75.00"
        );
    }
}
