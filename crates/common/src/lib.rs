//! Shared types for the batcher workspace.
//!
//! Holds the batch identifier plus the pure currency and money primitives the
//! aggregation engine is built on. Nothing in here performs I/O.

pub mod money;
pub mod types;

pub use money::{Amount, Currency, MoneyError};
pub use types::BatchId;
