pub mod currency;
pub mod gateway;
pub mod timestamps;

pub use currency::{Currency, CurrencyResolver};
pub use gateway::{BlockHeader, ChainGateway, ChainRpc, FungibleMeta, InitializeLog, PoolState};
pub use timestamps::BlockTimestampCache;
