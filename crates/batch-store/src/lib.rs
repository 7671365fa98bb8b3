pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::{Amount, BatchId, Currency};
pub use error::{Result, StoreError};
pub use memory::InMemoryBatchStore;
pub use model::{Batch, BatchStatus, ParseStatusError};
pub use postgres::PostgresBatchStore;
pub use query::{BatchFilter, BatchPage, SortOrder};
pub use store::{BatchStore, Write};
