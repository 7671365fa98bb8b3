use std::sync::Arc;

use async_trait::async_trait;
use common::BatchId;
use tokio::sync::RwLock;

use crate::{
    Batch, BatchFilter, BatchPage, BatchStatus, Result, SortOrder, StoreError,
    store::{BatchStore, Write},
};

#[derive(Debug, Default)]
struct MemoryState {
    /// Batches in insertion order.
    batches: Vec<Batch>,
    fail_next_write: bool,
    pending_conflicts: u32,
}

/// In-memory batch store implementation for testing and store-less runs.
///
/// A single write lock is held for the whole of [`BatchStore::atomically`],
/// so transactions are serializable. Failures and conflicts can be injected
/// to exercise the all-or-nothing behaviour callers rely on.
#[derive(Clone, Default)]
pub struct InMemoryBatchStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryBatchStore {
    /// Creates a new empty in-memory batch store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of batches stored.
    pub async fn batch_count(&self) -> usize {
        self.state.read().await.batches.len()
    }

    /// Returns every stored batch in insertion order.
    pub async fn all(&self) -> Vec<Batch> {
        self.state.read().await.batches.clone()
    }

    /// Makes the next write fail after its transition has run.
    pub async fn fail_next_write(&self) {
        self.state.write().await.fail_next_write = true;
    }

    /// Makes the next `count` atomic operations fail with a conflict.
    pub async fn inject_conflicts(&self, count: u32) {
        self.state.write().await.pending_conflicts = count;
    }

    /// Inserts a batch as-is, bypassing transitions. Intended for test setup.
    pub async fn seed(&self, batch: Batch) {
        self.state.write().await.batches.push(batch);
    }

    /// Clears all batches and injected failures.
    pub async fn clear(&self) {
        *self.state.write().await = MemoryState::default();
    }
}

impl MemoryState {
    fn put(&mut self, matched: Option<BatchId>, batch: Batch) -> Result<()> {
        match matched {
            Some(id) => {
                let slot = self
                    .batches
                    .iter_mut()
                    .find(|b| b.id == id)
                    .ok_or_else(|| StoreError::Conflict(format!("batch {id} vanished")))?;
                *slot = batch;
            }
            None => {
                // Unique index simulation: one open batch per user and currency.
                if batch.status == BatchStatus::Open
                    && self.batches.iter().any(|b| {
                        b.status == BatchStatus::Open
                            && b.user_id == batch.user_id
                            && b.currency == batch.currency
                    })
                {
                    return Err(StoreError::Conflict(format!(
                        "open batch already exists for user {} in {}",
                        batch.user_id, batch.currency
                    )));
                }
                self.batches.push(batch);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BatchStore for InMemoryBatchStore {
    async fn atomically<T, E, F>(&self, filter: &BatchFilter, transition: F) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: FnOnce(Option<Batch>) -> std::result::Result<(Write, T), E> + Send,
    {
        let mut state = self.state.write().await;

        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(StoreError::Conflict("injected conflict".to_string()).into());
        }

        let matched = filter.select(&state.batches).cloned();
        let matched_id = matched.as_ref().map(|b| b.id);

        let (write, output) = transition(matched)?;

        if let Write::Put(batch) = write {
            if state.fail_next_write {
                state.fail_next_write = false;
                return Err(StoreError::Unavailable("injected write failure".to_string()).into());
            }
            state.put(matched_id, batch)?;
        }

        Ok(output)
    }

    async fn find(&self, filter: &BatchFilter) -> Result<Option<Batch>> {
        let state = self.state.read().await;
        Ok(filter.select(&state.batches).cloned())
    }

    async fn get(&self, id: BatchId) -> Result<Option<Batch>> {
        let state = self.state.read().await;
        Ok(state.batches.iter().find(|b| b.id == id).cloned())
    }

    async fn paginate(&self, page: BatchPage) -> Result<Vec<Batch>> {
        let state = self.state.read().await;
        let mut batches: Vec<_> = state
            .batches
            .iter()
            .filter(|b| page.status.is_none_or(|s| b.status == s))
            .cloned()
            .collect();

        batches.sort_by(|a, b| match page.order {
            SortOrder::Ascending => a.created_at.cmp(&b.created_at),
            SortOrder::Descending => b.created_at.cmp(&a.created_at),
        });

        Ok(batches
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect())
    }
}
