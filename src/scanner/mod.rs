pub mod processor;
pub mod scanner;

pub use processor::{PoolKey, PoolProcessor};
pub use scanner::{ScanResult, TokenScanner};
