//! Paying out ready batches.

use batch_store::{Batch, BatchFilter, BatchStatus, BatchStore, Write};
use chrono::Utc;
use common::BatchId;

use crate::error::{BatchingError, Result};
use crate::options::BatchingOptions;
use crate::sender::PaymentSender;

/// Result of a dispatch call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The batch was paid out and is now settled.
    Settled(Batch),

    /// No ready batch had that id. Nothing was sent.
    Skipped,
}

impl DispatchOutcome {
    fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Settled(_) => "settled",
            DispatchOutcome::Skipped => "skipped",
        }
    }
}

/// Sends ready batches to the payment sender and settles them.
pub struct Orchestrator<S: BatchStore, P: PaymentSender> {
    store: S,
    sender: P,
    options: BatchingOptions,
}

impl<S: BatchStore, P: PaymentSender> Orchestrator<S, P> {
    pub fn new(store: S, sender: P) -> Self {
        Self {
            store,
            sender,
            options: BatchingOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BatchingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sender(&self) -> &P {
        &self.sender
    }

    /// Pays out the batch `batch_id` if it is ready.
    ///
    /// A batch that is missing, still open or already settled yields
    /// [`DispatchOutcome::Skipped`]. A sender failure leaves the batch ready
    /// so a redelivered trigger can try again.
    #[tracing::instrument(skip(self))]
    pub async fn dispatch(&self, batch_id: &str) -> Result<DispatchOutcome> {
        let outcome = self.settle(batch_id).await;
        let label = match &outcome {
            Ok(outcome) => outcome.label(),
            Err(e) if e.is_validation() => "rejected",
            Err(_) => "failed",
        };
        metrics::counter!("batching_dispatches_total", "outcome" => label).increment(1);
        outcome
    }

    async fn settle(&self, batch_id: &str) -> Result<DispatchOutcome> {
        let id = parse_batch_id(batch_id)?;
        let filter = BatchFilter::ready(id);

        let Some(batch) = self.options.bounded(self.store.find(&filter)).await? else {
            tracing::info!(%id, "no ready batch, nothing to dispatch");
            return Ok(DispatchOutcome::Skipped);
        };

        self.sender
            .send(&batch.user_id, batch.amount, &batch.currency)
            .await
            .inspect_err(|e| tracing::warn!(%id, error = %e, "payment sender failed"))?;

        let now = Utc::now();
        let settled = self
            .options
            .bounded(self.store.atomically(&filter, |current| {
                let Some(mut batch) = current else {
                    return Ok((Write::Skip, None));
                };
                batch.status = BatchStatus::Settled;
                batch.settled_at = Some(now);
                batch.updated_at = now;
                Ok::<_, BatchingError>((Write::Put(batch.clone()), Some(batch)))
            }))
            .await?;

        match settled {
            Some(batch) => {
                tracing::info!(
                    %id,
                    user_id = %batch.user_id,
                    amount = %batch.amount,
                    currency = %batch.currency,
                    "batch settled"
                );
                Ok(DispatchOutcome::Settled(batch))
            }
            None => {
                tracing::warn!(%id, "batch left ready state during dispatch");
                Ok(DispatchOutcome::Skipped)
            }
        }
    }
}

fn parse_batch_id(raw: &str) -> Result<BatchId> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(BatchingError::MissingBatchId);
    }
    raw.parse()
        .map_err(|_| BatchingError::InvalidBatchId(raw.to_string()))
}
