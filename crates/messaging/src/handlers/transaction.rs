use std::sync::Arc;

use async_trait::async_trait;
use batch_store::BatchStore;
use batching::{Aggregator, DispatchTrigger, TransactionEvent};

use crate::consumer::MessageHandler;
use crate::error::MessagingError;
use crate::message::{Ack, Delivery, InboundMessage};
use crate::publisher::Publisher;
use crate::queues;

/// Folds transaction deliveries into batches and announces ready ones.
pub struct TransactionHandler<S: BatchStore, P: Publisher> {
    aggregator: Arc<Aggregator<S>>,
    publisher: P,
    dispatch_queue: String,
}

impl<S: BatchStore, P: Publisher> TransactionHandler<S, P> {
    pub fn new(aggregator: Arc<Aggregator<S>>, publisher: P) -> Self {
        Self {
            aggregator,
            publisher,
            dispatch_queue: queues::DISPATCH.to_string(),
        }
    }

    /// Publishes dispatch triggers to `queue` instead of the default.
    pub fn with_dispatch_queue(mut self, queue: impl Into<String>) -> Self {
        self.dispatch_queue = queue.into();
        self
    }

    async fn accumulate(&self, event: TransactionEvent, delivery: &Delivery) -> Ack {
        let outcome = match self.aggregator.accumulate(&event).await {
            Ok(outcome) => outcome,
            Err(e) => return Ack::from_error(e),
        };
        if !outcome.is_ready() {
            return Ack::done();
        }

        // Also taken on redelivery: the trigger may not have gone out the first time.
        let trigger = DispatchTrigger::for_batch(outcome.batch_id);
        let mut message = match Delivery::json(DispatchTrigger::KIND, &trigger) {
            Ok(message) => message,
            Err(e) => return Ack::requeue(e),
        };
        message.correlation_id = delivery.correlation_id.clone();

        match self.publisher.publish(&self.dispatch_queue, message).await {
            Ok(()) => {
                tracing::info!(batch_id = %outcome.batch_id, "dispatch requested");
                Ack::done()
            }
            Err(e) => {
                tracing::warn!(batch_id = %outcome.batch_id, error = %e, "could not request dispatch");
                Ack::requeue(e)
            }
        }
    }
}

#[async_trait]
impl<S: BatchStore, P: Publisher> MessageHandler for TransactionHandler<S, P> {
    async fn handle(&self, delivery: &Delivery) -> Ack {
        match InboundMessage::decode(delivery) {
            Ok(InboundMessage::Transaction(event)) => self.accumulate(event, delivery).await,
            Ok(other) => {
                tracing::warn!(kind = other.kind(), "unexpected message on transaction queue");
                Ack::reject(MessagingError::UnknownMessageKind(other.kind().to_string()))
            }
            Err(e) => Ack::reject(e),
        }
    }
}
