use std::sync::Arc;

use async_trait::async_trait;
use batch_store::BatchStore;
use batching::{Orchestrator, PaymentSender};

use crate::consumer::MessageHandler;
use crate::error::MessagingError;
use crate::message::{Ack, Delivery, InboundMessage};

/// Pays out batches named by dispatch triggers.
pub struct DispatchHandler<S: BatchStore, P: PaymentSender> {
    orchestrator: Arc<Orchestrator<S, P>>,
}

impl<S: BatchStore, P: PaymentSender> DispatchHandler<S, P> {
    pub fn new(orchestrator: Arc<Orchestrator<S, P>>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl<S: BatchStore, P: PaymentSender> MessageHandler for DispatchHandler<S, P> {
    async fn handle(&self, delivery: &Delivery) -> Ack {
        match InboundMessage::decode(delivery) {
            Ok(InboundMessage::Dispatch(trigger)) => {
                match self.orchestrator.dispatch(&trigger.batch_id).await {
                    Ok(_) => Ack::done(),
                    Err(e) => Ack::from_error(e),
                }
            }
            Ok(other) => {
                tracing::warn!(kind = other.kind(), "unexpected message on dispatch queue");
                Ack::reject(MessagingError::UnknownMessageKind(other.kind().to_string()))
            }
            Err(e) => Ack::reject(e),
        }
    }
}
