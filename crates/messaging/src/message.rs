//! Deliveries, typed inbound messages and acknowledgements.

use batching::{DispatchTrigger, TransactionEvent};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::{MessagingError, Result};

/// A message as handed out by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Kind tag selecting the payload schema.
    pub kind: String,

    /// JSON payload.
    pub body: Vec<u8>,

    /// Request id carried across hops, if the producer set one.
    pub correlation_id: Option<String>,

    /// 1 for the first delivery, incremented on every requeue.
    pub attempt: u32,
}

impl Delivery {
    pub fn new(kind: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            body: body.into(),
            correlation_id: None,
            attempt: 1,
        }
    }

    /// Encodes `payload` as JSON under `kind`.
    pub fn json<T: Serialize>(kind: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self::new(kind, serde_json::to_vec(payload)?))
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// The same message, one attempt later.
    pub fn redelivered(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

/// Generates a request id for deliveries that arrive without one.
pub fn new_correlation_id() -> String {
    format!("|:{}", Uuid::new_v4())
}

/// The messages the engine consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Transaction(TransactionEvent),
    Dispatch(DispatchTrigger),
}

impl InboundMessage {
    /// Decodes a delivery by its kind tag.
    pub fn decode(delivery: &Delivery) -> Result<Self> {
        match delivery.kind.as_str() {
            TransactionEvent::KIND => parse(delivery).map(InboundMessage::Transaction),
            DispatchTrigger::KIND => parse(delivery).map(InboundMessage::Dispatch),
            other => Err(MessagingError::UnknownMessageKind(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Transaction(_) => TransactionEvent::KIND,
            InboundMessage::Dispatch(_) => DispatchTrigger::KIND,
        }
    }
}

fn parse<T: DeserializeOwned>(delivery: &Delivery) -> Result<T> {
    serde_json::from_slice(&delivery.body).map_err(|source| MessagingError::MalformedPayload {
        kind: delivery.kind.clone(),
        source,
    })
}

/// What a handler tells the transport to do with a delivery.
///
/// `acknowledge = true` removes the message from the queue, with or without
/// an error. `acknowledge = false` puts it back for another attempt.
#[derive(Debug)]
pub struct Ack {
    pub acknowledge: bool,
    pub error: Option<MessagingError>,
}

impl Ack {
    /// Processed successfully.
    pub fn done() -> Self {
        Self {
            acknowledge: true,
            error: None,
        }
    }

    /// Permanently rejected; redelivery cannot help.
    pub fn reject(error: MessagingError) -> Self {
        Self {
            acknowledge: true,
            error: Some(error),
        }
    }

    /// Failed for now; redeliver later.
    pub fn requeue(error: MessagingError) -> Self {
        Self {
            acknowledge: false,
            error: Some(error),
        }
    }

    /// Rejects or requeues depending on whether `error` is retryable.
    pub fn from_error(error: impl Into<MessagingError>) -> Self {
        let error = error.into();
        if error.is_retryable() {
            Self::requeue(error)
        } else {
            Self::reject(error)
        }
    }

    pub fn is_requeue(&self) -> bool {
        !self.acknowledge
    }
}
