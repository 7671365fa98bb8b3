use common::{BatchId, Currency};

use crate::{Batch, BatchStatus};

/// Selects the single batch an atomic operation works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchFilter {
    /// The batch a transaction folds into: a batch of any status for
    /// `(user_id, currency)` that already lists `transaction_id`, otherwise
    /// the open batch for `(user_id, currency)`.
    Accumulation {
        user_id: String,
        currency: Currency,
        transaction_id: String,
    },

    /// The open batch for `(user_id, currency)`.
    Open { user_id: String, currency: Currency },

    /// A batch by id, only while it has the given status.
    IdAndStatus { id: BatchId, status: BatchStatus },
}

impl BatchFilter {
    /// Filter used by accumulation.
    pub fn accumulation(
        user_id: impl Into<String>,
        currency: Currency,
        transaction_id: impl Into<String>,
    ) -> Self {
        Self::Accumulation {
            user_id: user_id.into(),
            currency,
            transaction_id: transaction_id.into(),
        }
    }

    /// Filter for the open batch of a user and currency.
    pub fn open(user_id: impl Into<String>, currency: Currency) -> Self {
        Self::Open {
            user_id: user_id.into(),
            currency,
        }
    }

    /// Filter used by dispatch: the batch while it is ready.
    pub fn ready(id: BatchId) -> Self {
        Self::IdAndStatus {
            id,
            status: BatchStatus::Ready,
        }
    }

    /// Picks the matching batch out of `batches`, honoring the accumulation
    /// preference for a batch that already holds the transaction.
    pub fn select<'a, I>(&self, batches: I) -> Option<&'a Batch>
    where
        I: IntoIterator<Item = &'a Batch>,
    {
        match self {
            BatchFilter::Accumulation {
                user_id,
                currency,
                transaction_id,
            } => {
                let mut open = None;
                for batch in batches {
                    if &batch.user_id != user_id || &batch.currency != currency {
                        continue;
                    }
                    if batch.contains_transaction(transaction_id) {
                        return Some(batch);
                    }
                    if batch.status == BatchStatus::Open && open.is_none() {
                        open = Some(batch);
                    }
                }
                open
            }
            BatchFilter::Open { user_id, currency } => batches.into_iter().find(|b| {
                &b.user_id == user_id && &b.currency == currency && b.status == BatchStatus::Open
            }),
            BatchFilter::IdAndStatus { id, status } => batches
                .into_iter()
                .find(|b| &b.id == id && &b.status == status),
        }
    }
}

/// Sort direction on `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// A page of the batch history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPage {
    /// Maximum number of batches to return.
    pub limit: usize,

    /// Number of batches to skip.
    pub offset: usize,

    /// Ordering by creation time.
    pub order: SortOrder,

    /// Only batches in this status.
    pub status: Option<BatchStatus>,
}

impl Default for BatchPage {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
            order: SortOrder::Descending,
            status: None,
        }
    }
}

impl BatchPage {
    /// Creates the default page: first ten batches, newest first.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the number of batches to skip.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the creation-time ordering.
    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Filters by status.
    pub fn status(mut self, status: BatchStatus) -> Self {
        self.status = Some(status);
        self
    }
}
