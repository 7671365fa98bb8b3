use thiserror::Error;

/// Errors that can occur when interacting with the batch store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A concurrent writer touched the same record, or a second open batch
    /// would have been created for one user and currency.
    /// The whole transaction was rolled back and may be retried.
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// The store did not answer within the configured bound.
    #[error("Store operation timed out")]
    Timeout,

    /// The store is unavailable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The database refused the record itself (a check constraint or an
    /// out-of-range value). Writing the same record again fails the same way.
    #[error("Record rejected: {0}")]
    Rejected(String),

    /// A stored record could not be decoded.
    #[error("Corrupt batch record: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true for conflicts that a caller should retry with the same input.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Returns false when retrying cannot change the outcome.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Rejected(_))
    }
}

/// Result type for batch store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
