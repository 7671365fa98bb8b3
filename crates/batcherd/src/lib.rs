//! Batching service.
//!
//! Wires the batching engine to the message transport and exposes an HTTP
//! surface for transaction intake, batch history, health and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use batch_store::BatchStore;
use batching::{Aggregator, Orchestrator, PaymentSender};
use messaging::{
    Consumer, DispatchHandler, InMemoryBroker, Publisher, TransactionHandler, queues,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared state of the HTTP handlers.
pub struct AppState<S: BatchStore> {
    pub store: S,
    pub publisher: Arc<dyn Publisher>,
    pub store_timeout: Duration,
}

impl<S: BatchStore> AppState<S> {
    pub fn new(store: S, publisher: Arc<dyn Publisher>, store_timeout: Duration) -> Self {
        Self {
            store,
            publisher,
            store_timeout,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: BatchStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/v1/transactions", post(routes::transactions::publish::<S>))
        .route(
            "/v1/transactions/batches/history",
            get(routes::batches::history::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the aggregator, orchestrator and both adapters, and starts one
/// consumer per queue. The consumers stop once `shutdown` is cancelled.
pub fn spawn_consumers<S, P>(
    store: S,
    sender: P,
    config: &Config,
    broker: &InMemoryBroker,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>>
where
    S: BatchStore + Clone + 'static,
    P: PaymentSender + 'static,
{
    let thresholds = Arc::new(config.thresholds.clone());
    let aggregator =
        Arc::new(Aggregator::new(store.clone(), thresholds).with_options(config.batching));
    let orchestrator = Arc::new(Orchestrator::new(store, sender).with_options(config.batching));

    let transactions = Arc::new(TransactionHandler::new(aggregator, broker.clone()));
    let dispatches = Arc::new(DispatchHandler::new(orchestrator));

    let tx_consumer = Consumer::new(broker.clone(), config.consumer, shutdown.clone());
    let dispatch_consumer = Consumer::new(broker.clone(), config.consumer, shutdown.clone());

    vec![
        tokio::spawn(async move { tx_consumer.run(queues::TRANSACTIONS, transactions).await }),
        tokio::spawn(async move { dispatch_consumer.run(queues::DISPATCH, dispatches).await }),
    ]
}
