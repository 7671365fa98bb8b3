use std::future::Future;
use std::time::Duration;

use batch_store::StoreError;

use crate::{BatchingError, Result};

/// Tuning shared by the aggregator and the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchingOptions {
    /// Upper bound for a single store operation.
    pub store_timeout: Duration,

    /// How many times a conflicting accumulation is retried before giving up.
    pub conflict_retries: u32,
}

impl Default for BatchingOptions {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(30),
            conflict_retries: 3,
        }
    }
}

impl BatchingOptions {
    /// Runs a store operation, failing with [`StoreError::Timeout`] once the
    /// bound expires. The abandoned operation is dropped, which aborts any
    /// transaction it had open.
    pub(crate) async fn bounded<T, E, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        BatchingError: From<E>,
    {
        let result = tokio::time::timeout(self.store_timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout)?;
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = BatchingOptions::default();
        assert_eq!(options.store_timeout, Duration::from_secs(30));
        assert_eq!(options.conflict_retries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_turns_expiry_into_store_timeout() {
        let options = BatchingOptions {
            store_timeout: Duration::from_millis(10),
            ..Default::default()
        };

        let result: Result<()> = options
            .bounded(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, BatchingError>(())
            })
            .await;

        assert!(matches!(
            result,
            Err(BatchingError::Store(StoreError::Timeout))
        ));
    }
}
