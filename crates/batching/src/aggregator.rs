//! Folding transactions into batches.

use std::sync::Arc;

use batch_store::{Batch, BatchFilter, BatchStatus, BatchStore, Write};
use chrono::{DateTime, Utc};
use common::{Amount, BatchId, Currency};

use crate::error::{BatchingError, Result};
use crate::events::TransactionEvent;
use crate::options::BatchingOptions;
use crate::thresholds::ThresholdTable;

/// Outcome of folding one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accumulation {
    /// The batch the transaction belongs to.
    pub batch_id: BatchId,

    /// Status of that batch after the fold.
    pub status: BatchStatus,

    /// Accumulated amount of that batch after the fold.
    pub amount: Amount,

    /// True when the transaction had already been folded in and nothing changed.
    pub duplicate: bool,
}

impl Accumulation {
    fn of(batch: &Batch, duplicate: bool) -> Self {
        Self {
            batch_id: batch.id,
            status: batch.status,
            amount: batch.amount,
            duplicate,
        }
    }

    /// Returns true when the batch awaits dispatch.
    pub fn is_ready(&self) -> bool {
        self.status == BatchStatus::Ready
    }
}

/// A validated transaction, ready to be folded.
#[derive(Debug, Clone)]
struct Fold {
    transaction_id: String,
    user_id: String,
    currency: Currency,
    contribution: Amount,
}

impl Fold {
    fn validate(transaction: &TransactionEvent) -> Result<Self> {
        if transaction.id.trim().is_empty() {
            return Err(BatchingError::MissingTransactionId);
        }
        if transaction.user_id.trim().is_empty() {
            return Err(BatchingError::MissingUserId);
        }
        let currency = Currency::from_code(&transaction.currency)?;
        let amount = Amount::parse(&transaction.amount)?;
        let contribution = amount.investment()?;

        Ok(Self {
            transaction_id: transaction.id.clone(),
            user_id: transaction.user_id.clone(),
            currency,
            contribution,
        })
    }

    /// The pure state transition run inside the store transaction.
    fn apply(
        &self,
        current: Option<Batch>,
        thresholds: &ThresholdTable,
        now: DateTime<Utc>,
    ) -> Result<(Write, Accumulation)> {
        let mut batch = match current {
            Some(batch) if batch.contains_transaction(&self.transaction_id) => {
                return Ok((Write::Skip, Accumulation::of(&batch, true)));
            }
            Some(batch) => batch,
            None => Batch::open(self.user_id.clone(), self.currency.clone(), now),
        };

        batch.amount = batch.amount.checked_add(self.contribution)?;
        batch.transaction_ids.push(self.transaction_id.clone());
        batch.updated_at = now;

        // Overflow past the threshold stays in this batch; it is not split.
        if batch.status.can_accumulate() && thresholds.is_reached(&batch.currency, &batch.amount)
        {
            batch.status = BatchStatus::Ready;
        }

        let outcome = Accumulation::of(&batch, false);
        Ok((Write::Put(batch), outcome))
    }
}

/// Folds transactions into per-user, per-currency batches.
///
/// The aggregator only reports the resulting status. Emitting a dispatch
/// trigger for a ready batch is up to the caller.
pub struct Aggregator<S: BatchStore> {
    store: S,
    thresholds: Arc<ThresholdTable>,
    options: BatchingOptions,
}

impl<S: BatchStore> Aggregator<S> {
    /// Creates an aggregator with default options.
    pub fn new(store: S, thresholds: Arc<ThresholdTable>) -> Self {
        Self {
            store,
            thresholds,
            options: BatchingOptions::default(),
        }
    }

    /// Replaces the timeout and retry options.
    pub fn with_options(mut self, options: BatchingOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Folds `transaction` into the open batch of its user and currency,
    /// creating the batch if needed.
    ///
    /// Validation happens before the store is touched. The contribution is
    /// `ceil(amount) - amount`; the batch turns ready once its amount reaches
    /// the currency's threshold. A transaction id already present in a batch
    /// is not counted again: the call reports that batch unchanged. Write
    /// conflicts are retried with the same input up to the configured limit.
    #[tracing::instrument(
        skip(self, transaction),
        fields(transaction_id = %transaction.id, user_id = %transaction.user_id)
    )]
    pub async fn accumulate(&self, transaction: &TransactionEvent) -> Result<Accumulation> {
        let fold = Fold::validate(transaction)?;
        let filter = BatchFilter::accumulation(
            fold.user_id.clone(),
            fold.currency.clone(),
            fold.transaction_id.clone(),
        );
        let thresholds = self.thresholds.as_ref();

        let mut attempts = 0;
        loop {
            attempts += 1;
            let now = Utc::now();
            let result = self
                .options
                .bounded(
                    self.store
                        .atomically(&filter, |current| fold.apply(current, thresholds, now)),
                )
                .await;

            match result {
                Err(BatchingError::Store(e)) if e.is_conflict() => {
                    metrics::counter!("batching_conflict_retries_total").increment(1);
                    if attempts > self.options.conflict_retries {
                        tracing::error!(attempts, error = %e, "accumulation kept conflicting");
                        return Err(BatchingError::ConflictRetriesExhausted { attempts });
                    }
                    tracing::warn!(attempts, error = %e, "accumulation conflicted, retrying");
                    tokio::task::yield_now().await;
                }
                Ok(outcome) => {
                    if outcome.duplicate {
                        tracing::info!(batch_id = %outcome.batch_id, "transaction already batched");
                    } else {
                        metrics::counter!("batching_accumulations_total").increment(1);
                        if outcome.is_ready() {
                            metrics::counter!("batching_batches_ready_total").increment(1);
                        }
                        tracing::info!(
                            batch_id = %outcome.batch_id,
                            status = %outcome.status,
                            amount = %outcome.amount,
                            "transaction batched"
                        );
                    }
                    return Ok(outcome);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use batch_store::{BatchPage, InMemoryBatchStore, StoreError};

    use super::*;

    fn thresholds(pairs: &[(&str, &str)]) -> Arc<ThresholdTable> {
        Arc::new(ThresholdTable::from_pairs(pairs.iter().copied()).unwrap())
    }

    fn aggregator(threshold: &str) -> Aggregator<InMemoryBatchStore> {
        Aggregator::new(InMemoryBatchStore::new(), thresholds(&[("USD", threshold)]))
    }

    fn tx(id: &str, amount: &str) -> TransactionEvent {
        TransactionEvent::new(id, "u1", amount, "USD")
    }

    #[tokio::test]
    async fn missing_transaction_id_is_rejected() {
        let agg = aggregator("100");
        let result = agg.accumulate(&tx("", "1.11")).await;
        assert!(matches!(result, Err(BatchingError::MissingTransactionId)));
        assert_eq!(agg.store().batch_count().await, 0);
    }

    #[tokio::test]
    async fn missing_user_id_is_rejected() {
        let agg = aggregator("100");
        let event = TransactionEvent::new("t1", "", "1.11", "USD");
        let result = agg.accumulate(&event).await;
        assert!(matches!(result, Err(BatchingError::MissingUserId)));
        assert_eq!(agg.store().batch_count().await, 0);
    }

    #[tokio::test]
    async fn invalid_currency_is_rejected() {
        let agg = aggregator("100");
        let event = TransactionEvent::new("t1", "u1", "1.11", "invalid");
        let result = agg.accumulate(&event).await;
        assert!(matches!(result, Err(BatchingError::InvalidCurrency(_))));
    }

    #[tokio::test]
    async fn invalid_amount_is_rejected() {
        let agg = aggregator("100");
        let result = agg.accumulate(&tx("t1", "one dollar")).await;
        assert!(matches!(result, Err(BatchingError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn zero_negative_and_whole_amounts_write_nothing() {
        let agg = aggregator("100");
        assert!(matches!(
            agg.accumulate(&tx("t1", "0")).await,
            Err(BatchingError::ZeroAmount)
        ));
        assert!(matches!(
            agg.accumulate(&tx("t2", "-2.13")).await,
            Err(BatchingError::NegativeAmount)
        ));
        assert!(matches!(
            agg.accumulate(&tx("t3", "7")).await,
            Err(BatchingError::ZeroAmount)
        ));
        assert_eq!(agg.store().batch_count().await, 0);
    }

    #[tokio::test]
    async fn contribution_that_would_round_the_batch_is_refused() {
        let agg = aggregator("100");
        let precise = "1.0000000000000000000000000001";
        let mut batch_id = None;
        for i in 1..=7 {
            let outcome = agg.accumulate(&tx(&format!("t{i}"), precise)).await.unwrap();
            batch_id = Some(outcome.batch_id);
        }

        let result = agg.accumulate(&tx("t8", precise)).await;

        assert!(matches!(result, Err(BatchingError::AmountPrecisionLoss)));
        let batch = agg.store().get(batch_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(batch.amount.to_string(), "6.9999999999999999999999999993");
        assert_eq!(batch.transaction_ids.len(), 7);
    }

    #[tokio::test]
    async fn first_transaction_creates_open_batch() {
        let agg = aggregator("0.50");

        let outcome = agg.accumulate(&tx("t1", "3.67")).await.unwrap();

        assert_eq!(outcome.status, BatchStatus::Open);
        assert_eq!(outcome.amount.to_string(), "0.33");
        assert!(!outcome.duplicate);
        let batch = agg.store().get(outcome.batch_id).await.unwrap().unwrap();
        assert_eq!(batch.user_id, "u1");
        assert_eq!(batch.currency.as_str(), "USD");
        assert_eq!(batch.transaction_ids, vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn crossing_threshold_marks_ready() {
        let agg = aggregator("0.50");

        let first = agg.accumulate(&tx("t1", "3.67")).await.unwrap();
        let second = agg.accumulate(&tx("t2", "11.11")).await.unwrap();

        assert_eq!(second.batch_id, first.batch_id);
        assert_eq!(second.status, BatchStatus::Ready);
        assert_eq!(second.amount.to_string(), "1.22");
    }

    #[tokio::test]
    async fn ready_batch_is_never_reopened() {
        let agg = aggregator("0.30");

        let ready = agg.accumulate(&tx("t1", "3.67")).await.unwrap();
        assert!(ready.is_ready());

        let next = agg.accumulate(&tx("t2", "1.99")).await.unwrap();
        assert_ne!(next.batch_id, ready.batch_id);
        assert_eq!(next.status, BatchStatus::Open);

        let stored = agg.store().get(ready.batch_id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Ready);
        assert_eq!(stored.amount.to_string(), "0.33");
    }

    #[tokio::test]
    async fn currency_without_threshold_stays_open() {
        let agg = aggregator("0.01");
        let event = TransactionEvent::new("t1", "u1", "0.01", "EUR");

        let outcome = agg.accumulate(&event).await.unwrap();

        assert_eq!(outcome.status, BatchStatus::Open);
        assert_eq!(outcome.amount.to_string(), "0.99");
    }

    #[tokio::test]
    async fn redelivered_transaction_is_not_counted_twice() {
        let agg = aggregator("100");

        let first = agg.accumulate(&tx("t1", "3.67")).await.unwrap();
        let again = agg.accumulate(&tx("t1", "3.67")).await.unwrap();

        assert!(again.duplicate);
        assert_eq!(again.batch_id, first.batch_id);
        assert_eq!(again.amount.to_string(), "0.33");
        let batch = agg.store().get(first.batch_id).await.unwrap().unwrap();
        assert_eq!(batch.transaction_ids.len(), 1);
    }

    #[tokio::test]
    async fn redelivery_into_ready_batch_reports_ready_again() {
        let agg = aggregator("0.30");

        let first = agg.accumulate(&tx("t1", "3.67")).await.unwrap();
        let again = agg.accumulate(&tx("t1", "3.67")).await.unwrap();

        assert!(again.duplicate);
        assert!(again.is_ready());
        assert_eq!(again.batch_id, first.batch_id);
        assert_eq!(agg.store().batch_count().await, 1);
    }

    #[tokio::test]
    async fn store_failure_mid_transaction_leaves_batch_unchanged() {
        let agg = aggregator("100");
        let first = agg.accumulate(&tx("t1", "3.67")).await.unwrap();
        let before = agg.store().get(first.batch_id).await.unwrap().unwrap();

        agg.store().fail_next_write().await;
        let result = agg.accumulate(&tx("t2", "11.11")).await;

        assert!(matches!(
            result,
            Err(BatchingError::Store(StoreError::Unavailable(_)))
        ));
        let after = agg.store().get(first.batch_id).await.unwrap().unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn conflicts_are_retried() {
        let agg = aggregator("100");
        agg.store().inject_conflicts(2).await;

        let outcome = agg.accumulate(&tx("t1", "3.67")).await.unwrap();

        assert_eq!(outcome.amount.to_string(), "0.33");
        assert_eq!(agg.store().batch_count().await, 1);
    }

    #[tokio::test]
    async fn conflict_retries_are_bounded() {
        let agg = aggregator("100").with_options(BatchingOptions {
            conflict_retries: 1,
            ..Default::default()
        });
        agg.store().inject_conflicts(5).await;

        let result = agg.accumulate(&tx("t1", "3.67")).await;

        assert!(matches!(
            result,
            Err(BatchingError::ConflictRetriesExhausted { attempts: 2 })
        ));
        assert!(agg.store().paginate(BatchPage::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn users_and_currencies_get_separate_batches() {
        let agg = aggregator("100");

        let a = agg.accumulate(&TransactionEvent::new("t1", "u1", "1.5", "USD")).await.unwrap();
        let b = agg.accumulate(&TransactionEvent::new("t2", "u2", "1.5", "USD")).await.unwrap();
        let c = agg.accumulate(&TransactionEvent::new("t3", "u1", "1.5", "eur")).await.unwrap();

        assert_ne!(a.batch_id, b.batch_id);
        assert_ne!(a.batch_id, c.batch_id);
        assert_eq!(agg.store().batch_count().await, 3);
    }
}
