//! Payment sender contract and its implementations.

use std::sync::Arc;

use async_trait::async_trait;
use common::{Amount, Currency};
use thiserror::Error;
use tokio::sync::RwLock;

/// Failures reported by a payment sender. All of them are retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SenderError {
    /// The sender could not be reached.
    #[error("payment sender unavailable: {0}")]
    Unavailable(String),

    /// The sender refused the payout.
    #[error("payment rejected: {0}")]
    Rejected(String),
}

/// Sends an accumulated amount to the user's payout destination.
#[async_trait]
pub trait PaymentSender: Send + Sync {
    /// Sends `amount` in `currency` to `user_id`.
    async fn send(
        &self,
        user_id: &str,
        amount: Amount,
        currency: &Currency,
    ) -> Result<(), SenderError>;
}

/// Payment sender that only logs the payout.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPaymentSender;

#[async_trait]
impl PaymentSender for LoggingPaymentSender {
    async fn send(
        &self,
        user_id: &str,
        amount: Amount,
        currency: &Currency,
    ) -> Result<(), SenderError> {
        tracing::info!(%user_id, %amount, %currency, "sending money to the bank");
        Ok(())
    }
}

/// A payout recorded by [`InMemoryPaymentSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub user_id: String,
    pub amount: Amount,
    pub currency: Currency,
}

#[derive(Debug, Default)]
struct InMemorySenderState {
    payouts: Vec<Payout>,
    fail_on_send: bool,
}

/// In-memory payment sender for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentSender {
    state: Arc<RwLock<InMemorySenderState>>,
}

impl InMemoryPaymentSender {
    /// Creates a new in-memory payment sender.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the sender to fail every send until reset.
    pub async fn set_fail_on_send(&self, fail: bool) {
        self.state.write().await.fail_on_send = fail;
    }

    /// Returns the number of successful payouts.
    pub async fn payout_count(&self) -> usize {
        self.state.read().await.payouts.len()
    }

    /// Returns every successful payout in call order.
    pub async fn payouts(&self) -> Vec<Payout> {
        self.state.read().await.payouts.clone()
    }
}

#[async_trait]
impl PaymentSender for InMemoryPaymentSender {
    async fn send(
        &self,
        user_id: &str,
        amount: Amount,
        currency: &Currency,
    ) -> Result<(), SenderError> {
        let mut state = self.state.write().await;

        if state.fail_on_send {
            return Err(SenderError::Unavailable("bank is down".to_string()));
        }

        state.payouts.push(Payout {
            user_id: user_id.to_string(),
            amount,
            currency: currency.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> Currency {
        Currency::from_code("USD").unwrap()
    }

    #[tokio::test]
    async fn records_payouts() {
        let sender = InMemoryPaymentSender::new();
        let amount = Amount::parse("1.22").unwrap();

        sender.send("u1", amount, &usd()).await.unwrap();

        assert_eq!(sender.payout_count().await, 1);
        assert_eq!(
            sender.payouts().await,
            vec![Payout {
                user_id: "u1".to_string(),
                amount,
                currency: usd(),
            }]
        );
    }

    #[tokio::test]
    async fn fail_on_send_records_nothing() {
        let sender = InMemoryPaymentSender::new();
        sender.set_fail_on_send(true).await;

        let result = sender.send("u1", Amount::parse("1").unwrap(), &usd()).await;

        assert!(matches!(result, Err(SenderError::Unavailable(_))));
        assert_eq!(sender.payout_count().await, 0);
    }

    #[tokio::test]
    async fn logging_sender_always_succeeds() {
        let result = LoggingPaymentSender
            .send("u1", Amount::parse("0.5").unwrap(), &usd())
            .await;
        assert!(result.is_ok());
    }
}
