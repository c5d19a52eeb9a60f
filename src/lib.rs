pub mod abis;
pub mod chain;
pub mod config;
pub mod cron;
pub mod db;
pub mod error;
pub mod events;
pub mod exec;
pub mod feed;
pub mod http;
pub mod kv;
pub mod scanner;
pub mod social;
pub mod tokens;
pub mod utils;

pub use config::Settings;
pub use cron::{CronScheduler, CronSettings};
pub use error::{ApiError, ApiResult};
pub use events::EventBus;
pub use kv::KvGateway;
pub use scanner::TokenScanner;
pub use tokens::TokenRepository;
