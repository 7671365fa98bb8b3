//! Batch history endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use batch_store::{Batch, BatchPage, BatchStatus, BatchStore, SortOrder, StoreError};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

/// Largest page a client may ask for.
pub const MAX_LIMIT: usize = 1000;

/// Query parameters of the history endpoint. Kept as raw strings so a bad
/// value produces a readable 400 instead of a generic rejection.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<String>,
    pub page: Option<String>,
    pub order: Option<String>,
    pub status: Option<String>,
}

impl HistoryQuery {
    /// `order=-1` sorts newest first, any other value oldest first.
    pub fn to_page(&self) -> Result<BatchPage, ApiError> {
        let limit = number("limit", self.limit.as_deref(), 10)?;
        if limit > MAX_LIMIT {
            return Err(ApiError::BadRequest(format!(
                "limit {limit} is above the maximum of {MAX_LIMIT}"
            )));
        }
        let page = number("page", self.page.as_deref(), 0)?;
        let offset = limit
            .checked_mul(page)
            .filter(|offset| i64::try_from(*offset).is_ok())
            .ok_or_else(|| ApiError::BadRequest("page is out of range".to_string()))?;

        let order = match self.order.as_deref().unwrap_or("-1") {
            "-1" => SortOrder::Descending,
            _ => SortOrder::Ascending,
        };

        let mut batches = BatchPage::new().limit(limit).offset(offset).order(order);
        if let Some(status) = self.status.as_deref().filter(|s| !s.is_empty()) {
            let status: BatchStatus = status
                .parse()
                .map_err(|e| ApiError::BadRequest(format!("invalid status: {e}")))?;
            batches = batches.status(status);
        }
        Ok(batches)
    }
}

fn number(name: &str, raw: Option<&str>, default: usize) -> Result<usize, ApiError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| ApiError::BadRequest(format!("invalid {name} '{raw}': {e}"))),
    }
}

/// GET /v1/transactions/batches/history: pages through batches by creation time.
#[tracing::instrument(skip(state))]
pub async fn history<S: BatchStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Batch>>, ApiError> {
    let page = query.to_page()?;
    let batches = tokio::time::timeout(state.store_timeout, state.store.paginate(page))
        .await
        .map_err(|_| StoreError::Timeout)??;
    Ok(Json(batches))
}
