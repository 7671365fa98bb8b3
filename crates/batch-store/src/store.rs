use async_trait::async_trait;
use common::BatchId;

use crate::{Batch, BatchFilter, BatchPage, Result, StoreError};

/// What a transition function asks the store to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    /// Persist this batch. It is inserted when the filter matched nothing,
    /// otherwise it replaces the matched record.
    Put(Batch),

    /// Leave the store untouched.
    Skip,
}

/// Core trait for batch store implementations.
///
/// The store exclusively owns persisted batch records. Every mutation goes
/// through [`BatchStore::atomically`], which runs a read, a pure state
/// transition and the resulting write as one all-or-nothing transaction.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Runs `transition` atomically against the batch selected by `filter`.
    ///
    /// The transition receives the matched batch (or `None`) and returns the
    /// write to apply together with a value handed back to the caller. If the
    /// transition fails nothing is written. A concurrent writer on the same
    /// record, or an insert that would create a second open batch for one
    /// user and currency, fails with [`StoreError::Conflict`] and leaves the
    /// store unchanged.
    ///
    /// Dropping the returned future before it completes aborts the
    /// transaction.
    async fn atomically<T, E, F>(&self, filter: &BatchFilter, transition: F) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnOnce(Option<Batch>) -> std::result::Result<(Write, T), E> + Send;

    /// Reads the batch selected by `filter` without locking it.
    async fn find(&self, filter: &BatchFilter) -> Result<Option<Batch>>;

    /// Reads a batch by id regardless of status.
    async fn get(&self, id: BatchId) -> Result<Option<Batch>>;

    /// Lists batches ordered by creation time.
    async fn paginate(&self, page: BatchPage) -> Result<Vec<Batch>>;
}
