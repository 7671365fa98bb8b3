//! Queue consumer loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::broker::InMemoryBroker;
use crate::message::{Ack, Delivery, new_correlation_id};

/// Handles one delivery and decides its fate.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Ack;
}

/// Consumer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Maximum deliveries in flight at once.
    pub prefetch: usize,

    /// Wait before a requeued delivery becomes visible again.
    pub requeue_delay: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            prefetch: 10,
            requeue_delay: Duration::from_millis(500),
        }
    }
}

/// Pulls deliveries off a queue and runs each one on its own task.
pub struct Consumer {
    broker: InMemoryBroker,
    options: ConsumerOptions,
    shutdown: CancellationToken,
}

impl Consumer {
    pub fn new(broker: InMemoryBroker, options: ConsumerOptions, shutdown: CancellationToken) -> Self {
        Self {
            broker,
            options,
            shutdown,
        }
    }

    /// Consumes `queue` until shutdown, then waits for in-flight deliveries.
    ///
    /// At most `prefetch` deliveries are processed concurrently. A delivery
    /// the handler does not acknowledge is put back on the queue after the
    /// requeue delay with its attempt counter bumped; it keeps its prefetch
    /// slot until then. On shutdown pending requeues skip the delay.
    #[tracing::instrument(skip(self, handler))]
    pub async fn run<H>(&self, queue: &str, handler: Arc<H>)
    where
        H: MessageHandler + 'static,
    {
        let prefetch = self.options.prefetch.max(1);
        let permits = Arc::new(Semaphore::new(prefetch));
        let receiver = self.broker.receiver(queue).await;
        tracing::info!(prefetch, "consumer started");

        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                delivery = async { receiver.lock().await.recv().await } => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let handler = Arc::clone(&handler);
            let broker = self.broker.clone();
            let queue = queue.to_string();
            let delay = self.options.requeue_delay;
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                // The permit is held until the delivery is back on the queue,
                // so draining on shutdown also waits for pending requeues.
                let _permit = permit;
                let mut delivery = delivery;
                delivery.correlation_id.get_or_insert_with(new_correlation_id);
                let ack = process(&queue, handler.as_ref(), &delivery).await;
                if ack.is_requeue() {
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if let Err(e) = broker.enqueue(&queue, delivery.redelivered()).await {
                        tracing::error!(%queue, error = %e, "could not requeue delivery");
                    }
                }
            });
        }

        // Every permit back means every spawned delivery was acked or requeued.
        let _drained = permits.acquire_many(prefetch as u32).await;
        tracing::info!("consumer stopped");
    }
}

async fn process<H: MessageHandler + ?Sized>(queue: &str, handler: &H, delivery: &Delivery) -> Ack {
    let span = tracing::info_span!(
        "delivery",
        %queue,
        kind = %delivery.kind,
        request_id = delivery.correlation_id.as_deref().unwrap_or_default(),
        attempt = delivery.attempt,
    );

    async {
        let started = Instant::now();
        let ack = handler.handle(delivery).await;
        let elapsed = started.elapsed();

        let outcome = match (ack.acknowledge, ack.error.is_some()) {
            (true, false) => "acked",
            (true, true) => "rejected",
            (false, _) => "requeued",
        };
        metrics::counter!(
            "messaging_deliveries_total",
            "queue" => queue.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("messaging_processing_seconds").record(elapsed.as_secs_f64());

        let elapsed_ms = elapsed.as_millis() as u64;
        if let Some(e) = &ack.error {
            tracing::error!(elapsed_ms, acknowledge = ack.acknowledge, error = %e, "processing failed");
        }
        tracing::info!(elapsed_ms, outcome, "processing finished");
        ack
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::MessagingError;
    use crate::publisher::Publisher;

    /// Requeues every delivery until it reaches `succeed_on` attempts.
    struct Flaky {
        succeed_on: u32,
        seen: Arc<tokio::sync::Mutex<Vec<Delivery>>>,
    }

    #[async_trait]
    impl MessageHandler for Flaky {
        async fn handle(&self, delivery: &Delivery) -> Ack {
            self.seen.lock().await.push(delivery.clone());
            if delivery.attempt < self.succeed_on {
                Ack::requeue(MessagingError::Unavailable("later".to_string()))
            } else {
                Ack::done()
            }
        }
    }

    /// Tracks the highest number of concurrent calls.
    struct Slow {
        active: AtomicUsize,
        peak: AtomicUsize,
        done: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Slow {
        async fn handle(&self, _delivery: &Delivery) -> Ack {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.done.fetch_add(1, Ordering::SeqCst);
            Ack::done()
        }
    }

    fn options(prefetch: usize) -> ConsumerOptions {
        ConsumerOptions {
            prefetch,
            requeue_delay: Duration::from_millis(5),
        }
    }

    async fn wait_until(mut ready: impl AsyncFnMut() -> bool) {
        for _ in 0..200 {
            if ready().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn requeued_deliveries_come_back_with_the_same_correlation_id() {
        let broker = InMemoryBroker::new();
        let shutdown = CancellationToken::new();
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let handler = Arc::new(Flaky {
            succeed_on: 3,
            seen: Arc::clone(&seen),
        });

        broker.publish("q", Delivery::new("k", "{}")).await.unwrap();
        let consumer = Consumer::new(broker.clone(), options(2), shutdown.clone());
        let task = tokio::spawn(async move { consumer.run("q", handler).await });

        wait_until(async || seen.lock().await.len() == 3).await;
        shutdown.cancel();
        task.await.unwrap();

        let seen = seen.lock().await;
        let attempts: Vec<u32> = seen.iter().map(|d| d.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        let id = seen[0].correlation_id.clone().unwrap();
        assert!(id.starts_with("|:"));
        assert!(seen.iter().all(|d| d.correlation_id.as_deref() == Some(id.as_str())));
    }

    #[tokio::test]
    async fn prefetch_bounds_concurrency() {
        let broker = InMemoryBroker::new();
        let shutdown = CancellationToken::new();
        let handler = Arc::new(Slow {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        });

        for i in 0..12 {
            broker
                .publish("q", Delivery::new("k", i.to_string()))
                .await
                .unwrap();
        }
        let consumer = Consumer::new(broker.clone(), options(3), shutdown.clone());
        let running = Arc::clone(&handler);
        let task = tokio::spawn(async move { consumer.run("q", running).await });

        wait_until(async || handler.done.load(Ordering::SeqCst) == 12).await;
        shutdown.cancel();
        task.await.unwrap();

        let peak = handler.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency was {peak}");
        assert!(peak >= 2, "deliveries never overlapped");
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_consumer() {
        let broker = InMemoryBroker::new();
        let shutdown = CancellationToken::new();
        let handler = Arc::new(Flaky {
            succeed_on: 1,
            seen: Arc::default(),
        });

        let consumer = Consumer::new(broker, options(1), shutdown.clone());
        let task = tokio::spawn(async move { consumer.run("idle", handler).await });
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_puts_pending_requeues_back_on_the_queue() {
        let broker = InMemoryBroker::new();
        let shutdown = CancellationToken::new();
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let handler = Arc::new(Flaky {
            succeed_on: u32::MAX,
            seen: Arc::clone(&seen),
        });
        let slow_requeue = ConsumerOptions {
            prefetch: 1,
            requeue_delay: Duration::from_secs(60),
        };

        broker.publish("q", Delivery::new("k", "{}")).await.unwrap();
        let consumer = Consumer::new(broker.clone(), slow_requeue, shutdown.clone());
        let task = tokio::spawn(async move { consumer.run("q", handler).await });

        wait_until(async || seen.lock().await.len() == 1).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        let requeued = broker.try_next("q").await.unwrap();
        assert_eq!(requeued.attempt, 2);
        assert_eq!(requeued.correlation_id, seen.lock().await[0].correlation_id);
    }
}
