//! Message payloads consumed and produced around the engine.

use common::BatchId;
use serde::{Deserialize, Serialize};

/// An incoming monetary transaction.
///
/// Fields are kept as received; validation happens in
/// [`crate::Aggregator::accumulate`] so a missing field surfaces as a typed
/// validation error rather than a decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    /// The transacted amount as a decimal string, not the contribution.
    #[serde(default)]
    pub amount: String,
    /// Currency represented in ISO 4217 standard.
    #[serde(default)]
    pub currency: String,
}

impl TransactionEvent {
    /// Message kind tag for transaction events.
    pub const KIND: &'static str = "transaction";

    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        amount: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            amount: amount.into(),
            currency: currency.into(),
        }
    }
}

/// Asks the orchestrator to pay out a ready batch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchTrigger {
    #[serde(default)]
    pub batch_id: String,
}

impl DispatchTrigger {
    /// Message kind tag for dispatch triggers.
    pub const KIND: &'static str = "dispatch";

    pub fn for_batch(id: BatchId) -> Self {
        Self {
            batch_id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_event_uses_camel_case() {
        let event: TransactionEvent = serde_json::from_str(
            r#"{"id":"t1","userId":"u1","amount":"3.67","currency":"usd"}"#,
        )
        .unwrap();
        assert_eq!(event, TransactionEvent::new("t1", "u1", "3.67", "usd"));
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let event: TransactionEvent = serde_json::from_str(r#"{"amount":"1.11"}"#).unwrap();
        assert!(event.id.is_empty());
        assert!(event.user_id.is_empty());
        assert!(event.currency.is_empty());
    }

    #[test]
    fn dispatch_trigger_carries_batch_id() {
        let id = BatchId::new();
        let json = serde_json::to_value(DispatchTrigger::for_batch(id)).unwrap();
        assert_eq!(json, serde_json::json!({ "batchId": id.to_string() }));
    }
}
