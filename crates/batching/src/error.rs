//! Batching error types.

use batch_store::StoreError;
use common::MoneyError;
use thiserror::Error;

use crate::sender::SenderError;

/// Errors that can occur while accumulating or dispatching batches.
///
/// Validation errors are deterministic: retrying the same input cannot
/// succeed. Everything else is an infrastructure failure worth retrying.
#[derive(Debug, Error)]
pub enum BatchingError {
    /// The transaction carries no id.
    #[error("no transaction id was provided")]
    MissingTransactionId,

    /// The transaction carries no user id.
    #[error("no user id was provided")]
    MissingUserId,

    /// The currency code is not a three-letter code.
    #[error("currency code '{0}' does not match ISO 4217 standard")]
    InvalidCurrency(String),

    /// The transaction amount is not a decimal number.
    #[error("'{0}' is not a valid decimal amount")]
    InvalidAmount(String),

    /// The transaction amount yields no contribution (zero or whole).
    #[error("provided amount value is zero")]
    ZeroAmount,

    /// The transaction amount is negative.
    #[error("provided amount value is negative")]
    NegativeAmount,

    /// The accumulated amount no longer fits the decimal representation.
    #[error("batch amount overflow")]
    AmountOverflow,

    /// The batch amount plus this contribution cannot be held exactly.
    #[error("batch amount would lose precision")]
    AmountPrecisionLoss,

    /// The dispatch trigger carries no batch id.
    #[error("no batch id was provided")]
    MissingBatchId,

    /// The batch id is not a valid store identifier.
    #[error("invalid batch id '{0}'")]
    InvalidBatchId(String),

    /// Concurrent writers kept conflicting with this accumulation.
    #[error("gave up after {attempts} conflicting attempts")]
    ConflictRetriesExhausted { attempts: u32 },

    /// Batch store error.
    #[error("Batch store error: {0}")]
    Store(#[from] StoreError),

    /// Payment sender error.
    #[error("Payment sender error: {0}")]
    Sender(#[from] SenderError),
}

impl BatchingError {
    /// Returns true if the operation may succeed when retried with the same input.
    pub fn is_retryable(&self) -> bool {
        match self {
            BatchingError::Store(e) => e.is_retryable(),
            BatchingError::Sender(_) | BatchingError::ConflictRetriesExhausted { .. } => true,
            _ => false,
        }
    }

    /// Returns true for deterministic input validation failures.
    pub fn is_validation(&self) -> bool {
        !self.is_retryable()
    }
}

impl From<MoneyError> for BatchingError {
    fn from(e: MoneyError) -> Self {
        match e {
            MoneyError::InvalidCurrency(code) => BatchingError::InvalidCurrency(code),
            MoneyError::InvalidAmount(amount) => BatchingError::InvalidAmount(amount),
            MoneyError::ZeroAmount => BatchingError::ZeroAmount,
            MoneyError::NegativeAmount => BatchingError::NegativeAmount,
            MoneyError::Overflow => BatchingError::AmountOverflow,
            MoneyError::PrecisionLoss => BatchingError::AmountPrecisionLoss,
        }
    }
}

/// Convenience type alias for batching results.
pub type Result<T> = std::result::Result<T, BatchingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_retryable() {
        let errors = [
            BatchingError::MissingTransactionId,
            BatchingError::MissingUserId,
            BatchingError::InvalidCurrency("US".to_string()),
            BatchingError::InvalidAmount("x".to_string()),
            BatchingError::ZeroAmount,
            BatchingError::NegativeAmount,
            BatchingError::AmountPrecisionLoss,
            BatchingError::MissingBatchId,
            BatchingError::InvalidBatchId("nope".to_string()),
        ];
        for err in errors {
            assert!(err.is_validation(), "{err}");
        }
    }

    #[test]
    fn infrastructure_errors_are_retryable() {
        assert!(BatchingError::Store(StoreError::Timeout).is_retryable());
        assert!(BatchingError::Store(StoreError::Conflict("x".to_string())).is_retryable());
        assert!(BatchingError::Sender(SenderError::Unavailable("down".to_string())).is_retryable());
        assert!(BatchingError::ConflictRetriesExhausted { attempts: 4 }.is_retryable());
    }

    #[test]
    fn rejected_store_writes_are_not_retryable() {
        let err = BatchingError::Store(StoreError::Rejected("currency check".to_string()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn money_errors_map_to_validation_variants() {
        assert!(matches!(
            BatchingError::from(MoneyError::ZeroAmount),
            BatchingError::ZeroAmount
        ));
        assert!(matches!(
            BatchingError::from(MoneyError::InvalidCurrency("X".to_string())),
            BatchingError::InvalidCurrency(code) if code == "X"
        ));
    }
}
