pub mod records;
pub mod repository;

pub use records::{AppType, PartitionMeta, TokenPartition, TokenRecord};
pub use repository::{StoreOutcome, TokenRepository};
