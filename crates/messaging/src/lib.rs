//! Message transport for the batching engine.
//!
//! The transport delivers at least once. Each delivery is decoded by its kind
//! tag into an [`InboundMessage`], handed to the matching adapter, and the
//! adapter answers with an [`Ack`]: acknowledged (possibly with a terminal
//! error) or requeued for another attempt.

pub mod broker;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod message;
pub mod publisher;

pub use broker::InMemoryBroker;
pub use consumer::{Consumer, ConsumerOptions, MessageHandler};
pub use error::{MessagingError, Result};
pub use handlers::{DispatchHandler, TransactionHandler};
pub use message::{Ack, Delivery, InboundMessage, new_correlation_id};
pub use publisher::Publisher;

/// Queue names used by the service.
pub mod queues {
    /// Incoming transaction events.
    pub const TRANSACTIONS: &str = "transactions";

    /// Dispatch triggers for ready batches.
    pub const DISPATCH: &str = "dispatch";
}
