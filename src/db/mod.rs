pub mod memory;
pub mod models;
pub mod postgres;
mod store;

pub use memory::MemoryStore;
pub use postgres::PostgresClient;
pub use store::SocialStore;
