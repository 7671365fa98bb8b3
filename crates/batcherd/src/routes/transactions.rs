//! Transaction intake endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use batch_store::BatchStore;
use batching::TransactionEvent;
use messaging::{Delivery, new_correlation_id, queues};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    pub request_id: String,
}

/// POST /v1/transactions: queues a transaction for batching.
///
/// The event is validated by the consumer, not here; acceptance only means
/// the broker took it.
#[tracing::instrument(skip(state, event))]
pub async fn publish<S: BatchStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(event): Json<TransactionEvent>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let request_id = new_correlation_id();
    let message = Delivery::json(TransactionEvent::KIND, &event)?
        .with_correlation_id(request_id.clone());

    state
        .publisher
        .publish(queues::TRANSACTIONS, message)
        .await?;

    metrics::counter!("batcherd_transactions_accepted_total").increment(1);
    tracing::info!(transaction_id = %event.id, %request_id, "transaction queued");

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { request_id })))
}
