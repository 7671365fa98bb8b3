//! Adapters between queue deliveries and the batching engine.

pub mod dispatch;
pub mod transaction;

pub use dispatch::DispatchHandler;
pub use transaction::TransactionHandler;
