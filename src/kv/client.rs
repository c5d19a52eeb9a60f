//! Redis-backed key/value store.
//!
//! Commands and publishes go through a `deadpool-redis` pool; subscriptions
//! go through the dedicated connection owned by the pub/sub task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use log::info;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::KvSettings;

use super::subscriber::{run_pubsub, SubscriberRegistry};
use super::{KvBackend, KvError, KvOp, KvReply, KvResult, Subscription};

pub struct RedisKv {
    pool: Pool,
    registry: Arc<SubscriberRegistry>,
    command_timeout: Duration,
}

impl RedisKv {
    /// Connect the command pool and spawn the subscribe-connection task.
    pub async fn connect(settings: &KvSettings, cancel: CancellationToken) -> KvResult<Self> {
        let cfg = Config::from_url(settings.url.as_str());
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| KvError::Pool(e.to_string()))?;

        let client = redis::Client::open(settings.url.as_str())?;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let registry = SubscriberRegistry::new(Some(control_tx));

        tokio::spawn(run_pubsub(client, control_rx, registry.clone(), cancel));

        let kv = Self {
            pool,
            registry,
            command_timeout: Duration::from_secs(settings.command_timeout_secs),
        };

        kv.ping().await?;
        info!("Connected to Redis");

        Ok(kv)
    }

    async fn conn(&self) -> KvResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| KvError::Pool(e.to_string()))
    }

    async fn timed<T>(&self, fut: impl std::future::Future<Output = KvResult<T>>) -> KvResult<T> {
        tokio::time::timeout(self.command_timeout, fut)
            .await
            .map_err(|_| KvError::Other(format!("command timed out after {:?}", self.command_timeout)))?
    }
}

fn value_to_reply(value: redis::Value) -> KvReply {
    match value {
        redis::Value::Nil => KvReply::Nil,
        redis::Value::Okay => KvReply::Ok,
        redis::Value::Int(v) => KvReply::Int(v),
        redis::Value::SimpleString(s) => KvReply::Str(s),
        redis::Value::BulkString(bytes) => {
            KvReply::Str(String::from_utf8_lossy(&bytes).into_owned())
        },
        redis::Value::Map(pairs) => {
            let mut map = HashMap::with_capacity(pairs.len());
            for (k, v) in pairs {
                if let (KvReply::Str(k), KvReply::Str(v)) =
                    (value_to_reply(k), value_to_reply(v))
                {
                    map.insert(k, v);
                }
            }
            KvReply::Map(map)
        },
        // RESP2 hashes arrive as flat field/value arrays.
        redis::Value::Array(items) => {
            let mut map = HashMap::with_capacity(items.len() / 2);
            let mut iter = items.into_iter();
            while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                if let (KvReply::Str(k), KvReply::Str(v)) =
                    (value_to_reply(k), value_to_reply(v))
                {
                    map.insert(k, v);
                }
            }
            KvReply::Map(map)
        },
        _ => KvReply::Nil,
    }
}

fn apply_op(pipe: &mut redis::Pipeline, op: &KvOp) {
    match op {
        KvOp::HGet { key, field } => {
            pipe.hget(key, field);
        },
        KvOp::HSet { key, field, value } => {
            pipe.hset(key, field, value);
        },
        KvOp::HIncrBy { key, field, delta } => {
            pipe.hincr(key, field, *delta);
        },
        KvOp::HGetAll { key } => {
            pipe.hgetall(key);
        },
        KvOp::LPush { key, value } => {
            pipe.lpush(key, value);
        },
        KvOp::LTrim { key, start, stop } => {
            pipe.ltrim(key, *start as isize, *stop as isize);
        },
        KvOp::SAdd { key, member } => {
            pipe.sadd(key, member);
        },
        KvOp::SRem { key, member } => {
            pipe.srem(key, member);
        },
        KvOp::Expire { key, ttl_secs } => {
            pipe.expire(key, *ttl_secs as i64);
        },
    }
}

#[async_trait]
impl KvBackend for RedisKv {
    async fn set(&self, key: &str, value: String, ttl_secs: Option<u64>) -> KvResult<()> {
        self.timed(async {
            let mut conn = self.conn().await?;
            match ttl_secs {
                Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl).await?,
                None => conn.set::<_, _, ()>(key, value).await?,
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.timed(async {
            let mut conn = self.conn().await?;
            Ok(conn.get(key).await?)
        })
        .await
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        self.timed(async {
            let mut conn = self.conn().await?;
            conn.del::<_, ()>(key).await?;
            Ok(())
        })
        .await
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        self.timed(async {
            let mut conn = self.conn().await?;
            Ok(conn.exists(key).await?)
        })
        .await
    }

    async fn ttl(&self, key: &str) -> KvResult<i64> {
        self.timed(async {
            let mut conn = self.conn().await?;
            Ok(conn.ttl(key).await?)
        })
        .await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<bool> {
        self.timed(async {
            let mut conn = self.conn().await?;
            Ok(conn.expire(key, ttl_secs as i64).await?)
        })
        .await
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> KvResult<bool> {
        self.timed(async {
            let mut conn = self.conn().await?;
            let created: i64 = conn.hset(key, field, value).await?;
            Ok(created == 1)
        })
        .await
    }

    async fn hget(&self, key: &str, field: &str) -> KvResult<Option<String>> {
        self.timed(async {
            let mut conn = self.conn().await?;
            Ok(conn.hget(key, field).await?)
        })
        .await
    }

    async fn hget_all(&self, key: &str) -> KvResult<HashMap<String, String>> {
        self.timed(async {
            let mut conn = self.conn().await?;
            Ok(conn.hgetall(key).await?)
        })
        .await
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> KvResult<i64> {
        self.timed(async {
            let mut conn = self.conn().await?;
            Ok(conn.hincr(key, field, delta).await?)
        })
        .await
    }

    async fn lpush(&self, key: &str, value: String) -> KvResult<u64> {
        self.timed(async {
            let mut conn = self.conn().await?;
            Ok(conn.lpush(key, value).await?)
        })
        .await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> KvResult<Vec<String>> {
        self.timed(async {
            let mut conn = self.conn().await?;
            Ok(conn.lrange(key, start as isize, stop as isize).await?)
        })
        .await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> KvResult<()> {
        self.timed(async {
            let mut conn = self.conn().await?;
            conn.ltrim::<_, ()>(key, start as isize, stop as isize).await?;
            Ok(())
        })
        .await
    }

    async fn llen(&self, key: &str) -> KvResult<u64> {
        self.timed(async {
            let mut conn = self.conn().await?;
            Ok(conn.llen(key).await?)
        })
        .await
    }

    async fn sadd(&self, key: &str, member: &str) -> KvResult<bool> {
        self.timed(async {
            let mut conn = self.conn().await?;
            let added: i64 = conn.sadd(key, member).await?;
            Ok(added == 1)
        })
        .await
    }

    async fn srem(&self, key: &str, member: &str) -> KvResult<bool> {
        self.timed(async {
            let mut conn = self.conn().await?;
            let removed: i64 = conn.srem(key, member).await?;
            Ok(removed == 1)
        })
        .await
    }

    async fn smembers(&self, key: &str) -> KvResult<Vec<String>> {
        self.timed(async {
            let mut conn = self.conn().await?;
            Ok(conn.smembers(key).await?)
        })
        .await
    }

    async fn publish(&self, channel: &str, message: String) -> KvResult<()> {
        self.timed(async {
            let mut conn = self.conn().await?;
            conn.publish::<_, _, ()>(channel, message).await?;
            Ok(())
        })
        .await
    }

    async fn subscribe(&self, channel: &str) -> KvResult<Subscription> {
        Ok(self.registry.subscribe(channel))
    }

    async fn pipeline(&self, ops: Vec<KvOp>) -> KvResult<Vec<KvReply>> {
        self.timed(async {
            let mut conn = self.conn().await?;

            let mut pipe = redis::pipe();
            pipe.atomic();
            for op in &ops {
                apply_op(&mut pipe, op);
            }

            let values: Vec<redis::Value> = pipe.query_async(&mut conn).await?;
            Ok(values.into_iter().map(value_to_reply).collect())
        })
        .await
    }

    async fn ping(&self) -> KvResult<()> {
        self.timed(async {
            let mut conn = self.conn().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}
