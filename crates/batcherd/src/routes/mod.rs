pub mod batches;
pub mod system;
pub mod transactions;
