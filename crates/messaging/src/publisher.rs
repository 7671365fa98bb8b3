use async_trait::async_trait;

use crate::Result;
use crate::message::Delivery;

/// Puts messages on a named queue.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Enqueues `message` on `queue`. Success means the broker took it.
    async fn publish(&self, queue: &str, message: Delivery) -> Result<()>;
}
