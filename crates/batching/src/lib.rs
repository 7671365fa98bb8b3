//! Batch aggregation and dispatch engine.
//!
//! Transactions are folded into one open batch per user and currency. Each
//! transaction contributes its round-up remainder (`ceil(amount) - amount`).
//! Once a batch reaches the threshold configured for its currency it becomes
//! ready, and a later dispatch pays the accumulated amount out and settles it:
//!
//! ```text
//! transaction ──► Aggregator::accumulate ──► (ready) ──► Orchestrator::dispatch ──► PaymentSender
//! ```
//!
//! Both components route every mutation through
//! [`batch_store::BatchStore::atomically`] and never publish messages
//! themselves; reacting to a `ready` status is the caller's job.

pub mod aggregator;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod options;
pub mod sender;
pub mod thresholds;

pub use aggregator::{Accumulation, Aggregator};
pub use dispatch::{DispatchOutcome, Orchestrator};
pub use error::{BatchingError, Result};
pub use events::{DispatchTrigger, TransactionEvent};
pub use options::BatchingOptions;
pub use sender::{InMemoryPaymentSender, LoggingPaymentSender, PaymentSender, Payout, SenderError};
pub use thresholds::{ThresholdError, ThresholdTable};
