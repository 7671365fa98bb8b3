//! Persisted batch record and its status state machine.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{Amount, BatchId, Currency};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a batch.
///
/// State transitions:
/// ```text
/// Open ──► Ready ──► Settled
/// ```
/// No transition skips a state and none is reversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Accepting contributions.
    #[default]
    Open,

    /// Threshold reached, waiting for the payout.
    Ready,

    /// Paid out (terminal state).
    Settled,
}

impl BatchStatus {
    /// Returns true if transactions may still be folded in.
    pub fn can_accumulate(&self) -> bool {
        matches!(self, BatchStatus::Open)
    }

    /// Returns true if the batch may be paid out.
    pub fn can_settle(&self) -> bool {
        matches!(self, BatchStatus::Ready)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Settled)
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Open => "open",
            BatchStatus::Ready => "ready",
            BatchStatus::Settled => "settled",
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a status name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError(pub String);

impl std::fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown batch status '{}'", self.0)
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for BatchStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(BatchStatus::Open),
            "ready" => Ok(BatchStatus::Ready),
            "settled" => Ok(BatchStatus::Settled),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// One accumulation bucket for a user's transactions in one currency.
///
/// At most one batch per `(user_id, currency)` is `Open` at any time.
/// `amount` equals the sum of the contributions of `transaction_ids`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: BatchId,
    pub user_id: String,
    pub currency: Currency,
    pub amount: Amount,
    pub transaction_ids: Vec<String>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
}

impl Batch {
    /// Creates an empty open batch with a fresh id.
    pub fn open(user_id: impl Into<String>, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            id: BatchId::new(),
            user_id: user_id.into(),
            currency,
            amount: Amount::ZERO,
            transaction_ids: Vec::new(),
            status: BatchStatus::Open,
            created_at: now,
            updated_at: now,
            settled_at: None,
        }
    }

    /// Returns true if the transaction was already folded into this batch.
    pub fn contains_transaction(&self, transaction_id: &str) -> bool {
        self.transaction_ids.iter().any(|id| id == transaction_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> Currency {
        Currency::from_code("USD").unwrap()
    }

    #[test]
    fn default_status_is_open() {
        assert_eq!(BatchStatus::default(), BatchStatus::Open);
    }

    #[test]
    fn only_open_accumulates_and_only_ready_settles() {
        assert!(BatchStatus::Open.can_accumulate());
        assert!(!BatchStatus::Ready.can_accumulate());
        assert!(!BatchStatus::Settled.can_accumulate());

        assert!(!BatchStatus::Open.can_settle());
        assert!(BatchStatus::Ready.can_settle());
        assert!(!BatchStatus::Settled.can_settle());

        assert!(BatchStatus::Settled.is_terminal());
        assert!(!BatchStatus::Ready.is_terminal());
    }

    #[test]
    fn status_names_parse_back() {
        for status in [BatchStatus::Open, BatchStatus::Ready, BatchStatus::Settled] {
            assert_eq!(status.as_str().parse::<BatchStatus>().unwrap(), status);
        }
        assert_eq!(
            "undispatched".parse::<BatchStatus>(),
            Err(ParseStatusError("undispatched".to_string()))
        );
    }

    #[test]
    fn new_batch_is_empty_and_open() {
        let now = Utc::now();
        let batch = Batch::open("u1", usd(), now);
        assert_eq!(batch.amount, Amount::ZERO);
        assert!(batch.transaction_ids.is_empty());
        assert_eq!(batch.status, BatchStatus::Open);
        assert_eq!(batch.created_at, now);
        assert_eq!(batch.updated_at, now);
        assert!(batch.settled_at.is_none());
    }

    #[test]
    fn contains_transaction_checks_ids() {
        let mut batch = Batch::open("u1", usd(), Utc::now());
        batch.transaction_ids.push("t1".to_string());
        assert!(batch.contains_transaction("t1"));
        assert!(!batch.contains_transaction("t2"));
    }

    #[test]
    fn json_layout_uses_camel_case() {
        let batch = Batch::open("u1", usd(), Utc::now());
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["currency"], "USD");
        assert_eq!(json["amount"], "0");
        assert_eq!(json["status"], "open");
        assert!(json.get("settledAt").is_none());
    }
}
