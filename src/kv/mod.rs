//! Typed gateway over the in-memory key/value store.
//!
//! Commands travel through a connection pool; pub/sub uses one dedicated
//! subscribe connection per process (the subscribe side cannot multiplex
//! commands). The [`KvGateway`] wraps a backend with JSON helpers; backends
//! exist for Redis ([`RedisKv`]) and for tests ([`MemoryKv`]).

mod client;
mod memory;
mod subscriber;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use client::RedisKv;
pub use memory::MemoryKv;
pub use subscriber::{Subscription, SubscriptionGuard};

pub type KvResult<T> = Result<T, KvError>;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv pool: {0}")]
    Pool(String),

    #[error("kv command: {0}")]
    Command(#[from] redis::RedisError),

    #[error("kv serialization: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("kv: {0}")]
    Other(String),
}

/// One operation inside a transactional pipeline.
#[derive(Debug, Clone)]
pub enum KvOp {
    HGet { key: String, field: String },
    HSet { key: String, field: String, value: String },
    HIncrBy { key: String, field: String, delta: i64 },
    HGetAll { key: String },
    LPush { key: String, value: String },
    LTrim { key: String, start: i64, stop: i64 },
    SAdd { key: String, member: String },
    SRem { key: String, member: String },
    Expire { key: String, ttl_secs: u64 },
}

/// Per-operation reply from a pipeline, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum KvReply {
    Nil,
    Ok,
    Int(i64),
    Str(String),
    Map(HashMap<String, String>),
}

impl KvReply {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, String>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }
}

/// Store operations every backend provides.
///
/// Values are strings at this level; JSON typing lives in [`KvGateway`].
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn set(&self, key: &str, value: String, ttl_secs: Option<u64>) -> KvResult<()>;
    async fn get(&self, key: &str) -> KvResult<Option<String>>;
    async fn del(&self, key: &str) -> KvResult<()>;
    async fn exists(&self, key: &str) -> KvResult<bool>;
    /// Remaining TTL in seconds; -1 when the key has no expiry, -2 when absent.
    async fn ttl(&self, key: &str) -> KvResult<i64>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<bool>;

    /// Returns true when the field was newly created.
    async fn hset(&self, key: &str, field: &str, value: String) -> KvResult<bool>;
    async fn hget(&self, key: &str, field: &str) -> KvResult<Option<String>>;
    async fn hget_all(&self, key: &str) -> KvResult<HashMap<String, String>>;
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> KvResult<i64>;

    async fn lpush(&self, key: &str, value: String) -> KvResult<u64>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> KvResult<Vec<String>>;
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> KvResult<()>;
    async fn llen(&self, key: &str) -> KvResult<u64>;

    async fn sadd(&self, key: &str, member: &str) -> KvResult<bool>;
    async fn srem(&self, key: &str, member: &str) -> KvResult<bool>;
    async fn smembers(&self, key: &str) -> KvResult<Vec<String>>;

    async fn publish(&self, channel: &str, message: String) -> KvResult<()>;
    async fn subscribe(&self, channel: &str) -> KvResult<Subscription>;

    /// Execute the operations as one atomic transaction, returning per-op
    /// replies in order.
    async fn pipeline(&self, ops: Vec<KvOp>) -> KvResult<Vec<KvReply>>;

    async fn ping(&self) -> KvResult<()>;
}

/// Cloneable typed facade over a [`KvBackend`].
#[derive(Clone)]
pub struct KvGateway {
    backend: Arc<dyn KvBackend>,
}

impl KvGateway {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: Option<u64>,
    ) -> KvResult<()> {
        let json = serde_json::to_string(value)?;
        self.backend.set(key, json, ttl_secs).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> KvResult<Option<T>> {
        match self.backend.get(key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn del(&self, key: &str) -> KvResult<()> {
        self.backend.del(key).await
    }

    pub async fn exists(&self, key: &str) -> KvResult<bool> {
        self.backend.exists(key).await
    }

    pub async fn ttl(&self, key: &str) -> KvResult<i64> {
        self.backend.ttl(key).await
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<bool> {
        self.backend.expire(key, ttl_secs).await
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> KvResult<bool> {
        self.backend.hset(key, field, value.to_string()).await
    }

    pub async fn hget(&self, key: &str, field: &str) -> KvResult<Option<String>> {
        self.backend.hget(key, field).await
    }

    pub async fn hget_all(&self, key: &str) -> KvResult<HashMap<String, String>> {
        self.backend.hget_all(key).await
    }

    pub async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> KvResult<i64> {
        self.backend.hincr_by(key, field, delta).await
    }

    pub async fn lpush(&self, key: &str, value: &str) -> KvResult<u64> {
        self.backend.lpush(key, value.to_string()).await
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> KvResult<Vec<String>> {
        self.backend.lrange(key, start, stop).await
    }

    pub async fn ltrim(&self, key: &str, start: i64, stop: i64) -> KvResult<()> {
        self.backend.ltrim(key, start, stop).await
    }

    pub async fn llen(&self, key: &str) -> KvResult<u64> {
        self.backend.llen(key).await
    }

    pub async fn sadd(&self, key: &str, member: &str) -> KvResult<bool> {
        self.backend.sadd(key, member).await
    }

    pub async fn srem(&self, key: &str, member: &str) -> KvResult<bool> {
        self.backend.srem(key, member).await
    }

    pub async fn smembers(&self, key: &str) -> KvResult<Vec<String>> {
        self.backend.smembers(key).await
    }

    pub async fn publish(&self, channel: &str, message: &str) -> KvResult<()> {
        self.backend.publish(channel, message.to_string()).await
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, value: &T) -> KvResult<()> {
        let json = serde_json::to_string(value)?;
        self.backend.publish(channel, json).await
    }

    pub async fn subscribe(&self, channel: &str) -> KvResult<Subscription> {
        self.backend.subscribe(channel).await
    }

    pub async fn pipeline(&self, ops: Vec<KvOp>) -> KvResult<Vec<KvReply>> {
        self.backend.pipeline(ops).await
    }

    pub async fn ping(&self) -> KvResult<()> {
        self.backend.ping().await
    }
}
