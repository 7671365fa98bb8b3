//! Messaging error types.

use batching::BatchingError;
use thiserror::Error;

/// Errors surfaced while decoding, handling or publishing messages.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The delivery carries a kind tag no handler understands.
    #[error("unknown message kind '{0}'")]
    UnknownMessageKind(String),

    /// The body could not be decoded as the declared kind.
    #[error("malformed '{kind}' payload: {source}")]
    MalformedPayload {
        kind: String,
        source: serde_json::Error,
    },

    /// An outgoing payload could not be encoded.
    #[error("could not encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The batching engine failed.
    #[error(transparent)]
    Batching(#[from] BatchingError),

    /// The broker refused or could not take the message.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The queue has no receiver any more.
    #[error("queue '{0}' is closed")]
    QueueClosed(String),
}

impl MessagingError {
    /// Returns true if redelivering the same message may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            MessagingError::Batching(e) => e.is_retryable(),
            MessagingError::Unavailable(_) | MessagingError::QueueClosed(_) => true,
            MessagingError::UnknownMessageKind(_)
            | MessagingError::MalformedPayload { .. }
            | MessagingError::Encode(_) => false,
        }
    }
}

/// Convenience type alias for messaging results.
pub type Result<T> = std::result::Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use batch_store::StoreError;

    use super::*;

    #[test]
    fn retryability_follows_the_engine() {
        assert!(!MessagingError::from(BatchingError::MissingUserId).is_retryable());
        assert!(MessagingError::from(BatchingError::Store(StoreError::Timeout)).is_retryable());
    }

    #[test]
    fn decode_failures_are_terminal() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let malformed = MessagingError::MalformedPayload {
            kind: "transaction".to_string(),
            source,
        };
        assert!(!malformed.is_retryable());
        assert!(!MessagingError::UnknownMessageKind("refund".to_string()).is_retryable());
        assert!(MessagingError::Unavailable("down".to_string()).is_retryable());
    }
}
