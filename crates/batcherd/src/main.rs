//! Batching service entry point.

use std::sync::Arc;

use batch_store::{BatchStore, InMemoryBatchStore, PostgresBatchStore};
use batcherd::config::{Config, LogFormat};
use batching::LoggingPaymentSender;
use messaging::{InMemoryBroker, queues};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing, with defaults if the configuration is broken
    let config = Config::from_env();
    let (filter, format) = match &config {
        Ok(config) => (config.log_level.clone(), config.log_format),
        Err(_) => ("info".to_string(), LogFormat::Text),
    };
    batcherd::telemetry::init_tracing(&filter, format);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Configuration errors are fatal
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    // 4. Pick the batch store
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let store = PostgresBatchStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            run(store, config, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, batches are kept in memory");
            run(InMemoryBatchStore::new(), config, metrics_handle).await;
        }
    }
}

async fn run<S: BatchStore + Clone + 'static>(
    store: S,
    config: Config,
    metrics_handle: PrometheusHandle,
) {
    // 5. Start the consumers
    let broker = InMemoryBroker::new();
    broker.declare(queues::TRANSACTIONS).await;
    broker.declare(queues::DISPATCH).await;

    let shutdown = CancellationToken::new();
    let consumers =
        batcherd::spawn_consumers(store.clone(), LoggingPaymentSender, &config, &broker, &shutdown);

    // 6. Build the application
    let state = Arc::new(batcherd::AppState::new(
        store,
        Arc::new(broker),
        config.batching.store_timeout,
    ));
    let app = batcherd::create_app(state, metrics_handle);

    // 7. Serve until a signal arrives, then drain the consumers
    let addr = config.addr();
    tracing::info!(%addr, thresholds = config.thresholds.len(), "starting batcherd");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    shutdown.cancel();
    for consumer in consumers {
        if let Err(e) = consumer.await {
            tracing::error!(error = %e, "consumer task failed");
        }
    }

    tracing::info!("server shut down gracefully");
}
