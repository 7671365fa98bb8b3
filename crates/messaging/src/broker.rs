//! In-process broker with named queues.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::error::{MessagingError, Result};
use crate::message::Delivery;
use crate::publisher::Publisher;

pub(crate) type QueueReceiver = Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>;

#[derive(Clone)]
struct Queue {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: QueueReceiver,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, Queue>,
    failing_publishes: u32,
}

/// Broker keeping every queue in memory.
///
/// Queues are created on first use. Messages are lost when the process
/// exits; redelivery only covers requeues decided by a consumer.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    async fn queue(&self, name: &str) -> Queue {
        if let Some(queue) = self.state.read().await.queues.get(name) {
            return queue.clone();
        }
        self.state
            .write()
            .await
            .queues
            .entry(name.to_string())
            .or_insert_with(Queue::new)
            .clone()
    }

    /// Creates `name` if it does not exist yet.
    pub async fn declare(&self, name: &str) {
        self.queue(name).await;
    }

    /// Appends a delivery to a queue without going through [`Publisher`].
    pub(crate) async fn enqueue(&self, name: &str, delivery: Delivery) -> Result<()> {
        self.queue(name)
            .await
            .sender
            .send(delivery)
            .map_err(|_| MessagingError::QueueClosed(name.to_string()))
    }

    pub(crate) async fn receiver(&self, name: &str) -> QueueReceiver {
        self.queue(name).await.receiver
    }

    /// Takes the next waiting delivery from `name`, if any. Waits while a
    /// consumer is blocked on the same queue.
    pub async fn try_next(&self, name: &str) -> Option<Delivery> {
        let receiver = self.receiver(name).await;
        let mut receiver = receiver.lock().await;
        receiver.try_recv().ok()
    }

    /// Makes the next `count` publishes fail.
    pub async fn fail_next_publishes(&self, count: u32) {
        self.state.write().await.failing_publishes = count;
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(&self, queue: &str, message: Delivery) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.failing_publishes > 0 {
                state.failing_publishes -= 1;
                return Err(MessagingError::Unavailable(format!(
                    "publish to '{queue}' refused"
                )));
            }
        }
        tracing::debug!(%queue, kind = %message.kind, "message published");
        self.enqueue(queue, message).await
    }
}
